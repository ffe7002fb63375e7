//! Host and native-function API.
//!
//! Natives see the stack through an *API window*: slot `0` is the receiver,
//! slots `1..` the arguments. Negative slots count from the top (`-1` is the
//! top value). Outside any native the window starts at the bottom of the stack.

use std::path::Path;

use crate::{
    bytecode::chunk::FunctionProto,
    runtime::{
        Raised,
        gc::{GcHandle, HeapObject},
        hashtable::StrKey,
        native_ext::{ExtError, NativeExtension},
        object::{Instance, List, Tuple},
        value::{HostPtr, Value, has_int_repr},
    },
};

use super::{Name, VM};

/// Resolves an import name to the compiled main function of that module.
pub type Importer = Box<dyn FnMut(&str) -> Option<FunctionProto>>;

impl VM {
    // -- Evaluation --

    /// Runs `proto` as the main function of `module` with `args`, returning
    /// its result or the exception that escaped it.
    pub fn evaluate(
        &mut self,
        module: &str,
        proto: &FunctionProto,
        args: &[Value],
    ) -> Result<Value, Value> {
        let module = self.module_named(module);
        self.push(Value::Obj(module));
        let closure = self.new_closure_for(proto, module);
        self.pop();

        self.push(Value::Obj(closure));
        self.stack.extend_from_slice(args);
        let result = self.call(args.len() as u8);
        let value = self.pop();
        result.map(|()| value).map_err(|Raised| value)
    }

    /// Pushes a closure over `proto`, published into `module`.
    pub fn push_function(&mut self, module: &str, proto: &FunctionProto) {
        let module = self.module_named(module);
        self.push(Value::Obj(module));
        let closure = self.new_closure_for(proto, module);
        self.set_peek(0, Value::Obj(closure));
    }

    /// Calls the callable `argc` slots below the top with the arguments above
    /// it, running guest code to completion. The callable and arguments are
    /// replaced by the result, or by the exception on failure.
    pub fn call(&mut self, argc: u8) -> Result<(), Raised> {
        let callee = self.peek(argc as usize);
        self.run_call(argc, |vm| vm.call_value(callee, argc))
    }

    /// Calls method `name` on the receiver `argc` slots below the top.
    pub fn call_method(&mut self, name: &str, argc: u8) -> Result<(), Raised> {
        let key = self.intern(name);
        self.call_method_key(key, argc)
    }

    pub(crate) fn call_method_key(&mut self, name: StrKey, argc: u8) -> Result<(), Raised> {
        self.run_call(argc, |vm| vm.invoke_value(name, argc))
    }

    fn run_call(
        &mut self,
        argc: u8,
        start: impl FnOnce(&mut Self) -> Result<(), Raised>,
    ) -> Result<(), Raised> {
        let depth = self.frames.len();
        let base = self.stack.len() - argc as usize - 1;

        if self.reentrant >= self.config.max_reentrant {
            let raised = self.raise(
                "StackOverflowException",
                "Exceeded maximum number of reentrant calls",
            );
            self.settle_exception(base, depth);
            return Err(raised);
        }

        self.reentrant += 1;
        let result = start(self).and_then(|()| {
            if self.frames.len() > depth {
                self.run_eval(depth)
            } else {
                Ok(())
            }
        });
        self.reentrant -= 1;

        if let Err(raised) = result {
            self.settle_exception(base, depth);
            return Err(raised);
        }
        Ok(())
    }

    /// Leaves only the exception where the call's receiver was.
    fn settle_exception(&mut self, base: usize, depth: usize) {
        if self.frames.len() > depth {
            self.unwind_stack(depth);
        }
        let exception = self.pop();
        self.stack.truncate(base);
        self.push(exception);
    }

    // -- Exceptions --

    /// Creates an instance of the core exception class `class` carrying
    /// `message`, leaves it on top of the stack and returns the marker to
    /// propagate.
    pub fn raise(&mut self, class: &str, message: impl AsRef<str>) -> Raised {
        let class = match self.core_global(class) {
            Some(Value::Obj(handle)) if self.is_subclass(handle, self.core.exception) => handle,
            _ => self.core.exception,
        };

        let text = self.new_string(message.as_ref().as_bytes());
        self.push(Value::Obj(text));
        let exception = self.alloc_with_class(HeapObject::Instance(Instance::default()), Some(class));
        self.push(Value::Obj(exception));
        let trace = self.alloc(HeapObject::StackTrace(Default::default()));

        let err_key = self.name(Name::ExcErr);
        let trace_key = self.name(Name::ExcTrace);
        if let Some(instance) = self.as_instance_mut(Value::Obj(exception)) {
            instance.fields.put(err_key, Value::Obj(text));
            instance.fields.put(trace_key, Value::Obj(trace));
        }

        self.pop();
        self.set_peek(0, Value::Obj(exception));
        Raised
    }

    /// Message stored in an exception instance.
    pub fn exception_message(&self, exception: Value) -> String {
        let message = self
            .as_instance(exception)
            .and_then(|i| i.fields.get(self.name(Name::ExcErr)));
        match message.and_then(|m| self.as_string(m)) {
            Some(s) => s.as_str().into_owned(),
            None => String::new(),
        }
    }

    /// Renders an exception with its traceback and any chain of causes.
    pub fn format_exception(&self, exception: Value) -> String {
        let mut out = String::new();
        self.format_exception_into(exception, &mut out);
        out
    }

    fn format_exception_into(&self, exception: Value, out: &mut String) {
        if let Some(cause) = self
            .as_instance(exception)
            .and_then(|i| i.fields.get(self.name(Name::ExcCause)))
            && self.is_instance(cause, self.core.exception)
        {
            self.format_exception_into(cause, out);
            out.push_str("\n\nAbove Exception caused:\n");
        }

        if let Some(trace) = self.exception_trace(exception)
            && let HeapObject::StackTrace(st) = self.heap.get(trace)
        {
            st.render(out);
        }

        out.push_str(&self.type_name_of(exception));
        let message = self.exception_message(exception);
        if !message.is_empty() {
            out.push_str(": ");
            out.push_str(&message);
        }
    }

    /// The stack trace of an exception, for structured inspection.
    pub fn exception_trace_json(&self, exception: Value) -> Option<serde_json::Value> {
        let trace = self.exception_trace(exception)?;
        match self.heap.get(trace) {
            HeapObject::StackTrace(st) => serde_json::to_value(st).ok(),
            _ => None,
        }
    }

    // -- Stack marshalling --

    fn slot_index(&self, slot: isize) -> usize {
        if slot < 0 {
            (self.stack.len() as isize + slot) as usize
        } else {
            self.api_base + slot as usize
        }
    }

    /// Value at an API slot.
    pub fn value_at(&self, slot: isize) -> Value {
        self.stack[self.slot_index(slot)]
    }

    pub fn push_value(&mut self, value: Value) {
        self.push(value);
    }

    pub fn pop_value(&mut self) -> Value {
        self.pop()
    }

    /// Pushes a copy of the value at `slot`.
    pub fn push_slot(&mut self, slot: isize) {
        let value = self.value_at(slot);
        self.push(value);
    }

    pub fn push_null(&mut self) {
        self.push(Value::Null);
    }

    pub fn push_number(&mut self, n: f64) {
        self.push(Value::Number(n));
    }

    pub fn push_bool(&mut self, b: bool) {
        self.push(Value::Boolean(b));
    }

    pub fn push_handle(&mut self, ptr: HostPtr) {
        self.push(Value::Handle(ptr));
    }

    /// Pushes a new (non-interned) string.
    pub fn push_string(&mut self, text: &str) {
        let handle = self.new_string(text.as_bytes());
        self.push(Value::Obj(handle));
    }

    pub fn push_list(&mut self) {
        let handle = self.alloc(HeapObject::List(List::default()));
        self.push(Value::Obj(handle));
    }

    /// Pops the top `n` values into a new tuple and pushes it.
    pub fn push_tuple(&mut self, n: usize) {
        let start = self.stack.len() - n;
        let items: Box<[Value]> = self.stack[start..].into();
        let handle = self.alloc(HeapObject::Tuple(Tuple { items }));
        self.stack.truncate(start);
        self.push(Value::Obj(handle));
    }

    pub fn push_table(&mut self) {
        let handle = self.alloc(HeapObject::Table(Default::default()));
        self.push(Value::Obj(handle));
    }

    pub fn get_number(&self, slot: isize) -> Option<f64> {
        self.value_at(slot).as_number()
    }

    pub fn get_bool(&self, slot: isize) -> Option<bool> {
        self.value_at(slot).as_bool()
    }

    pub fn get_string(&self, slot: isize) -> Option<String> {
        self.as_string(self.value_at(slot))
            .map(|s| s.as_str().into_owned())
    }

    pub fn is_list(&self, slot: isize) -> bool {
        self.as_list(self.value_at(slot)).is_some()
    }

    pub fn is_tuple(&self, slot: isize) -> bool {
        self.as_tuple(self.value_at(slot)).is_some()
    }

    pub fn is_table(&self, slot: isize) -> bool {
        self.as_table(self.value_at(slot)).is_some()
    }

    pub fn is_instance_of(&self, slot: isize, class: GcHandle) -> bool {
        self.is_instance(self.value_at(slot), class)
    }

    // -- Argument validation --

    #[cold]
    fn type_error(&mut self, name: &str, expected: &str) -> Raised {
        self.raise("TypeException", format!("{} must be {}.", name, expected))
    }

    pub fn check_number(&mut self, slot: isize, name: &str) -> Result<f64, Raised> {
        match self.value_at(slot) {
            Value::Number(n) => Ok(n),
            _ => Err(self.type_error(name, "a number")),
        }
    }

    pub fn check_int(&mut self, slot: isize, name: &str) -> Result<i64, Raised> {
        match self.value_at(slot) {
            Value::Number(n) if has_int_repr(n) => Ok(n as i64),
            _ => Err(self.type_error(name, "an integer")),
        }
    }

    pub fn check_bool(&mut self, slot: isize, name: &str) -> Result<bool, Raised> {
        match self.value_at(slot) {
            Value::Boolean(b) => Ok(b),
            _ => Err(self.type_error(name, "a Boolean")),
        }
    }

    pub fn check_string(&mut self, slot: isize, name: &str) -> Result<String, Raised> {
        match self.get_string(slot) {
            Some(s) => Ok(s),
            None => Err(self.type_error(name, "a String")),
        }
    }

    pub fn check_list(&mut self, slot: isize, name: &str) -> Result<(), Raised> {
        if self.is_list(slot) {
            Ok(())
        } else {
            Err(self.type_error(name, "a List"))
        }
    }

    pub fn check_tuple(&mut self, slot: isize, name: &str) -> Result<(), Raised> {
        if self.is_tuple(slot) {
            Ok(())
        } else {
            Err(self.type_error(name, "a Tuple"))
        }
    }

    pub fn check_table(&mut self, slot: isize, name: &str) -> Result<(), Raised> {
        if self.is_table(slot) {
            Ok(())
        } else {
            Err(self.type_error(name, "a Table"))
        }
    }

    pub fn check_handle(&mut self, slot: isize, name: &str) -> Result<HostPtr, Raised> {
        match self.value_at(slot) {
            Value::Handle(ptr) => Ok(ptr),
            _ => Err(self.type_error(name, "an Handle")),
        }
    }

    /// Checks that `slot` holds an integer index below `max`.
    pub fn check_index(&mut self, slot: isize, max: usize, name: &str) -> Result<usize, Raised> {
        let index = self.check_int(slot, name)?;
        self.check_index_num(index as f64, max)
    }

    // -- Globals and fields --

    /// Pushes global `name` of `module` (the current frame's module when `None`).
    pub fn get_global(&mut self, module: Option<&str>, name: &str) -> Result<(), Raised> {
        let module = self.api_module(module)?;
        let key = self.intern(name);
        let value = self.as_module(Value::Obj(module)).and_then(|m| m.globals.get(key));
        let value = match value {
            Some(value) => value,
            None => match self.as_module(Value::Obj(self.core_module)).and_then(|m| m.globals.get(key)) {
                Some(value) => value,
                None => {
                    let message = format!(
                        "Name `{}` is not defined in module `{}`.",
                        name,
                        self.module_name(module)
                    );
                    return Err(self.raise("NameException", message));
                }
            },
        };
        self.push(value);
        Ok(())
    }

    /// Stores the top value into global `name`, leaving it on the stack.
    pub fn set_global(&mut self, module: Option<&str>, name: &str) -> Result<(), Raised> {
        let module = self.api_module(module)?;
        let key = self.intern(name);
        let value = self.peek(0);
        if let Some(m) = self.as_module_mut(Value::Obj(module)) {
            m.globals.put(key, value);
        }
        self.recharge(Value::Obj(module));
        Ok(())
    }

    fn api_module(&mut self, module: Option<&str>) -> Result<GcHandle, Raised> {
        match module {
            None => Ok(self
                .frames
                .last()
                .map(|frame| frame.module)
                .unwrap_or(self.core_module)),
            Some(name) => {
                let key = self.intern(name);
                match self.find_module(key) {
                    Some(module) => Ok(module),
                    None => Err(self.raise(
                        "ImportException",
                        format!("Module `{}` is not loaded.", name),
                    )),
                }
            }
        }
    }

    /// Pushes field `name` of the object at `slot`.
    pub fn get_field(&mut self, slot: isize, name: &str) -> Result<(), Raised> {
        let key = self.intern(name);
        self.push_slot(slot);
        self.get_field_key(key)
    }

    /// Stores the top value into field `name` of the object at `slot`,
    /// leaving the value on the stack.
    pub fn set_field(&mut self, slot: isize, name: &str) -> Result<(), Raised> {
        let key = self.intern(name);
        let object = self.value_at(slot);
        self.push(object);
        self.set_field_key(key)
    }

    // -- Lists and tuples --

    pub fn list_len(&self, slot: isize) -> Option<usize> {
        self.as_list(self.value_at(slot)).map(|l| l.items.len())
    }

    /// Pushes item `index` of the list at `slot`.
    pub fn list_get(&mut self, slot: isize, index: usize) -> Result<(), Raised> {
        let list = self.value_at(slot);
        let item = self.as_list(list).and_then(|l| l.items.get(index).copied());
        match item {
            Some(item) => {
                self.push(item);
                Ok(())
            }
            None => {
                let len = self.as_list(list).map_or(0, |l| l.items.len());
                self.check_index_num(index as f64, len).map(|_| ())
            }
        }
    }

    /// Pops the top value and appends it to the list at `slot`.
    pub fn list_push(&mut self, slot: isize) {
        let list = self.value_at(slot);
        let value = self.pop();
        if let Some(l) = self.as_list_mut(list) {
            l.items.push(value);
        }
        self.recharge(list);
    }

    pub fn tuple_len(&self, slot: isize) -> Option<usize> {
        self.as_tuple(self.value_at(slot)).map(|t| t.items.len())
    }

    /// Pushes item `index` of the tuple at `slot`.
    pub fn tuple_get(&mut self, slot: isize, index: usize) -> Result<(), Raised> {
        let tuple = self.value_at(slot);
        let item = self.as_tuple(tuple).and_then(|t| t.items.get(index).copied());
        match item {
            Some(item) => {
                self.push(item);
                Ok(())
            }
            None => {
                let len = self.as_tuple(tuple).map_or(0, |t| t.items.len());
                self.check_index_num(index as f64, len).map(|_| ())
            }
        }
    }

    /// Items of a list or tuple value.
    pub fn sequence_items(&self, value: Value) -> Option<Vec<Value>> {
        if let Some(list) = self.as_list(value) {
            return Some(list.items.clone());
        }
        self.as_tuple(value).map(|t| t.items.to_vec())
    }

    /// Text of a string value.
    pub fn string_value(&self, value: Value) -> Option<String> {
        self.as_string(value).map(|s| s.as_str().into_owned())
    }

    /// Allocates an interned string value.
    pub fn intern_value(&mut self, text: &str) -> Value {
        Value::Obj(self.intern(text).handle)
    }

    // -- Modules --

    /// Installs the callback `IMPORT` uses to find modules that are not loaded.
    pub fn set_importer(&mut self, importer: impl FnMut(&str) -> Option<FunctionProto> + 'static) {
        self.importer = Some(Box::new(importer));
    }

    pub(super) fn load_module_proto(&mut self, name: &str) -> Option<FunctionProto> {
        let mut importer = self.importer.take()?;
        let proto = importer(name);
        self.importer = Some(importer);
        proto
    }

    pub fn is_module_loaded(&mut self, name: &str) -> bool {
        let key = self.intern(name);
        self.find_module(key).is_some()
    }

    /// Attaches the native extension at `path` to `module`, creating the
    /// module if needed. Natives declared by the module resolve against it.
    pub fn load_extension(&mut self, module: &str, path: impl AsRef<Path>) -> Result<(), ExtError> {
        let extension = NativeExtension::open(path.as_ref())?;
        self.attach_extension(module, extension);
        Ok(())
    }

    /// Attaches an already opened extension to `module`, replacing any
    /// previous one.
    pub fn attach_extension(&mut self, module: &str, extension: NativeExtension) {
        let module = self.module_named(module);
        if let Some(m) = self.as_module_mut(Value::Obj(module)) {
            m.extension = Some(extension);
        }
    }
}
