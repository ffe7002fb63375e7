use serde::Serialize;

/// One frame of a captured traceback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameRecord {
    pub module: String,
    pub function: String,
    /// Source line, `0` for natives.
    pub line: u32,
    /// Consecutive identical frames (recursion) folded into this record.
    pub repeat: u32,
}

impl FrameRecord {
    fn same_site(&self, other: &FrameRecord) -> bool {
        self.module == other.module && self.function == other.function && self.line == other.line
    }
}

#[derive(Debug, Default, Serialize)]
pub struct StackTrace {
    pub records: Vec<FrameRecord>,
    /// Frame depth recorded last, so re-raising in the same frame does not
    /// duplicate it.
    #[serde(skip)]
    pub last_traced_depth: Option<usize>,
}

impl StackTrace {
    /// Appends the frame at `depth` unless it was the last one recorded.
    pub fn record(&mut self, depth: usize, mut record: FrameRecord) {
        if self.last_traced_depth == Some(depth) {
            return;
        }
        self.last_traced_depth = Some(depth);

        if let Some(last) = self.records.last_mut()
            && last.same_site(&record)
        {
            last.repeat += 1;
            return;
        }
        record.repeat = 1;
        self.records.push(record);
    }

    /// Total number of frames, folded repeats included.
    pub fn depth(&self) -> usize {
        self.records.iter().map(|r| r.repeat as usize).sum()
    }

    /// Renders the traceback, most recent call last.
    pub fn render(&self, out: &mut String) {
        if self.records.is_empty() {
            return;
        }
        out.push_str("Traceback (most recent call last):\n");
        for record in self.records.iter().rev() {
            if record.line > 0 {
                out.push_str(&format!(
                    "    [line {}] in {}.{}()\n",
                    record.line, record.module, record.function
                ));
            } else {
                out.push_str(&format!(
                    "    [line ?] in {}.{}()\n",
                    record.module, record.function
                ));
            }
            if record.repeat > 1 {
                out.push_str("    ...\n");
                out.push_str(&format!(
                    "    [Previous line repeated {} times]\n",
                    record.repeat - 1
                ));
            }
        }
    }
}
