use std::rc::Rc;

use crate::{
    bytecode::chunk::{Constant, FunctionProto},
    config::VmConfig,
    runtime::{
        builtins,
        frame::Frame,
        gc::{GcHandle, GcHeap, GcStats, HeapObject},
        hashtable::{HashTable, StrKey},
        object::{Chunk, Closure, Function, Module, Native, Proto, StrObj, string::hash_bytes},
        value::Value,
    },
};

mod access;
mod api;
mod binary_ops;
mod comparison_ops;
mod dispatch;
mod field_ops;
mod function_call;
mod index_ops;
mod table_ops;
mod trace;
mod unwind;
mod upvalues;

pub use api::Importer;

/// Name of the module holding the core classes. Globals missing from a
/// module are looked up here.
pub const CORE_MODULE: &str = "__core__";
/// Module used by [`VM::evaluate`] when the host does not name one.
pub const MAIN_MODULE: &str = "__main__";

/// Method and field names the VM looks up by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub(crate) enum Name {
    Ctor,
    Iter,
    Next,
    Get,
    Set,
    Add,
    Radd,
    Sub,
    Rsub,
    Mul,
    Rmul,
    Div,
    Rdiv,
    Mod,
    Rmod,
    Pow,
    Rpow,
    Band,
    Rband,
    Bor,
    Rbor,
    Xor,
    Rxor,
    Lshift,
    Rlshift,
    Rshift,
    Rrshift,
    Neg,
    Inv,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Hash,
    ExcErr,
    ExcTrace,
    ExcCause,
}

impl Name {
    const COUNT: usize = Name::ExcCause as usize + 1;

    const ALL: [Name; Name::COUNT] = [
        Name::Ctor,
        Name::Iter,
        Name::Next,
        Name::Get,
        Name::Set,
        Name::Add,
        Name::Radd,
        Name::Sub,
        Name::Rsub,
        Name::Mul,
        Name::Rmul,
        Name::Div,
        Name::Rdiv,
        Name::Mod,
        Name::Rmod,
        Name::Pow,
        Name::Rpow,
        Name::Band,
        Name::Rband,
        Name::Bor,
        Name::Rbor,
        Name::Xor,
        Name::Rxor,
        Name::Lshift,
        Name::Rlshift,
        Name::Rshift,
        Name::Rrshift,
        Name::Neg,
        Name::Inv,
        Name::Eq,
        Name::Lt,
        Name::Le,
        Name::Gt,
        Name::Ge,
        Name::Hash,
        Name::ExcErr,
        Name::ExcTrace,
        Name::ExcCause,
    ];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Name::Ctor => "new",
            Name::Iter => "__iter__",
            Name::Next => "__next__",
            Name::Get => "__get__",
            Name::Set => "__set__",
            Name::Add => "__add__",
            Name::Radd => "__radd__",
            Name::Sub => "__sub__",
            Name::Rsub => "__rsub__",
            Name::Mul => "__mul__",
            Name::Rmul => "__rmul__",
            Name::Div => "__div__",
            Name::Rdiv => "__rdiv__",
            Name::Mod => "__mod__",
            Name::Rmod => "__rmod__",
            Name::Pow => "__pow__",
            Name::Rpow => "__rpow__",
            Name::Band => "__band__",
            Name::Rband => "__rband__",
            Name::Bor => "__bor__",
            Name::Rbor => "__rbor__",
            Name::Xor => "__xor__",
            Name::Rxor => "__rxor__",
            Name::Lshift => "__lshft__",
            Name::Rlshift => "__rlshft__",
            Name::Rshift => "__rshft__",
            Name::Rrshift => "__rrshft__",
            Name::Neg => "__neg__",
            Name::Inv => "__inv__",
            Name::Eq => "__eq__",
            Name::Lt => "__lt__",
            Name::Le => "__le__",
            Name::Gt => "__gt__",
            Name::Ge => "__ge__",
            Name::Hash => "__hash__",
            Name::ExcErr => "_err",
            Name::ExcTrace => "_stacktrace",
            Name::ExcCause => "_cause",
        }
    }
}

/// Handles of the classes the VM needs without a global lookup.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CoreClasses {
    pub class: GcHandle,
    pub object: GcHandle,
    pub string: GcHandle,
    pub boolean: GcHandle,
    pub number: GcHandle,
    pub null: GcHandle,
    pub function: GcHandle,
    pub module: GcHandle,
    pub list: GcHandle,
    pub tuple: GcHandle,
    pub table: GcHandle,
    pub stack_trace: GcHandle,
    pub exception: GcHandle,
}

impl CoreClasses {
    /// Stand-in used until bootstrap has created the real classes; it never
    /// resolves to a live object.
    fn placeholder() -> Self {
        let none = GcHandle::from_parts(u32::MAX, u16::MAX);
        Self {
            class: none,
            object: none,
            string: none,
            boolean: none,
            number: none,
            null: none,
            function: none,
            module: none,
            list: none,
            tuple: none,
            table: none,
            stack_trace: none,
            exception: none,
        }
    }

    fn all(&self) -> [GcHandle; 13] {
        [
            self.class,
            self.object,
            self.string,
            self.boolean,
            self.number,
            self.null,
            self.function,
            self.module,
            self.list,
            self.tuple,
            self.table,
            self.stack_trace,
            self.exception,
        ]
    }

    /// Builtins that cannot be called to make an instance.
    pub fn is_non_instantiable(&self, class: GcHandle) -> bool {
        class == self.null
            || class == self.function
            || class == self.module
            || class == self.stack_trace
            || class == self.class
    }

    /// Builtins whose constructor receives `null` instead of a fresh instance.
    pub fn is_instantiable_builtin(&self, class: GcHandle) -> bool {
        class == self.list
            || class == self.tuple
            || class == self.number
            || class == self.boolean
            || class == self.string
            || class == self.table
    }

    pub fn is_builtin(&self, class: GcHandle) -> bool {
        self.is_non_instantiable(class) || self.is_instantiable_builtin(class)
    }
}

/// The virtual machine: value stack, call frames, heap and the tables the
/// VM consults by identity.
///
/// A `VM` is single-threaded and owns everything it touches; independent
/// interpreters need independent `VM`s.
pub struct VM {
    pub(crate) heap: GcHeap,
    /// Intern pool. Values are unused; entries die with their string.
    strings: HashTable,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    /// Open upvalues sorted by stack slot.
    pub(crate) open_upvalues: Vec<(usize, GcHandle)>,
    /// Stack index of slot 0 for the running native.
    pub(crate) api_base: usize,
    /// Host calls currently running guest code on the Rust stack.
    pub(crate) reentrant: usize,
    /// Loaded modules by name.
    pub(crate) modules: HashTable,
    pub(crate) core: CoreClasses,
    pub(crate) core_module: GcHandle,
    names: [StrKey; Name::COUNT],
    bootstrapped: bool,
    pub(crate) importer: Option<Importer>,
    pub(crate) config: VmConfig,
    pub(crate) trace: bool,
}

impl VM {
    pub fn new(config: VmConfig) -> Self {
        let placeholder_key = StrKey {
            handle: GcHandle::from_parts(u32::MAX, u16::MAX),
            hash: 0,
        };
        let mut vm = Self {
            heap: GcHeap::new(config.first_gc, config.heap_grow_rate),
            strings: HashTable::new(),
            stack: Vec::with_capacity(config.initial_stack),
            frames: Vec::with_capacity(64),
            open_upvalues: Vec::new(),
            api_base: 0,
            reentrant: 0,
            modules: HashTable::new(),
            core: CoreClasses::placeholder(),
            core_module: GcHandle::from_parts(u32::MAX, u16::MAX),
            names: [placeholder_key; Name::COUNT],
            bootstrapped: false,
            importer: None,
            trace: config.trace,
            config,
        };

        vm.with_gc_disabled(|vm| {
            for name in Name::ALL {
                vm.names[name as usize] = vm.intern(name.as_str());
            }
            builtins::bootstrap(vm);
        });
        vm.bootstrapped = true;
        vm
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn name(&self, name: Name) -> StrKey {
        self.names[name as usize]
    }

    pub(crate) fn finish_bootstrap(&mut self, core: CoreClasses, core_module: GcHandle) {
        self.core = core;
        self.core_module = core_module;
        let classes = self.core;
        self.heap.patch_classes(|object| default_class(&classes, object));
    }

    // -- Stack --

    #[inline]
    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Value {
        match self.stack.pop() {
            Some(value) => value,
            None => panic!("value stack underflow"),
        }
    }

    /// Value `distance` slots below the top (`0` is the top).
    #[inline]
    pub(crate) fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    #[inline]
    pub(crate) fn set_peek(&mut self, distance: usize, value: Value) {
        let index = self.stack.len() - 1 - distance;
        self.stack[index] = value;
    }

    pub(crate) fn swap_top(&mut self, a: usize, b: usize) {
        let len = self.stack.len();
        self.stack.swap(len - 1 - a, len - 1 - b);
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    // -- Allocation --

    /// Allocates `object` with the class its kind implies.
    pub(crate) fn alloc(&mut self, object: HeapObject) -> GcHandle {
        let class = if self.bootstrapped {
            default_class(&self.core, &object)
        } else {
            None
        };
        self.alloc_with_class(object, class)
    }

    /// Allocates `object`, running a collection first when the heap has
    /// crossed its threshold. `object` and `class` are kept alive through it.
    pub(crate) fn alloc_with_class(
        &mut self,
        object: HeapObject,
        class: Option<GcHandle>,
    ) -> GcHandle {
        if self.heap.should_collect(object.shallow_size_bytes()) {
            self.collect_garbage_with(Some(&object), class);
        }
        self.heap.alloc(object, class)
    }

    /// Returns the interned string with `text`'s bytes, creating it if needed.
    pub(crate) fn intern(&mut self, text: &str) -> StrKey {
        self.intern_bytes(text.as_bytes())
    }

    pub(crate) fn intern_bytes(&mut self, bytes: &[u8]) -> StrKey {
        let hash = hash_bytes(bytes);
        let heap = &self.heap;
        let existing = self.strings.find_by(hash, |key| match heap.get(key.handle) {
            HeapObject::String(s) => s.as_bytes() == bytes,
            _ => false,
        });
        if let Some(key) = existing {
            return key;
        }

        let handle = self.alloc(HeapObject::String(StrObj::interned_with_hash(bytes, hash)));
        let key = StrKey { handle, hash };
        self.strings.put(key, Value::Null);
        key
    }

    /// Allocates a fresh, non-interned string.
    pub(crate) fn new_string(&mut self, bytes: impl Into<Box<[u8]>>) -> GcHandle {
        self.alloc(HeapObject::String(StrObj::new(bytes, false)))
    }

    /// Key for an interned string value, as stored in name constants.
    pub(crate) fn key_of(&self, value: Value) -> StrKey {
        match value {
            Value::Obj(handle) => match self.heap.get(handle) {
                HeapObject::String(s) if s.is_interned() => StrKey {
                    handle,
                    hash: s.hash(),
                },
                _ => panic!("name constant is not an interned string"),
            },
            _ => panic!("name constant is not an interned string"),
        }
    }

    // -- Modules and functions --

    /// Returns the module called `name`, creating and registering it if needed.
    pub(crate) fn module_named(&mut self, name: &str) -> GcHandle {
        let key = self.intern(name);
        if let Some(Value::Obj(module)) = self.modules.get(key) {
            return module;
        }
        self.push(Value::Obj(key.handle));
        let module = self.alloc(HeapObject::Module(Module::new(key.handle)));
        self.modules.put(key, Value::Obj(module));
        self.pop();
        module
    }

    pub(crate) fn find_module(&self, key: StrKey) -> Option<GcHandle> {
        self.modules.get(key).and_then(Value::as_obj)
    }

    /// Moves a compiled function and everything it refers to into the heap.
    /// Callers suspend collection: nothing roots the partially built objects.
    fn publish_function(&mut self, proto: &FunctionProto, module: GcHandle) -> GcHandle {
        let constants: Vec<Value> = proto
            .constants
            .iter()
            .map(|constant| self.publish_constant(constant, module))
            .collect();
        let defaults: Vec<Value> = proto
            .defaults
            .iter()
            .map(|constant| self.publish_constant(constant, module))
            .collect();
        let name = self.intern(&proto.name).handle;

        self.alloc(HeapObject::Function(Function {
            proto: Proto {
                name,
                module,
                arity: proto.arity,
                defaults: defaults.into_boxed_slice(),
                vararg: proto.vararg,
            },
            chunk: Rc::new(Chunk {
                code: proto.code.clone().into_boxed_slice(),
                constants: constants.into_boxed_slice(),
                lines: proto.lines.clone(),
            }),
            upvalue_count: proto.upvalue_count,
        }))
    }

    fn publish_constant(&mut self, constant: &Constant, module: GcHandle) -> Value {
        match constant {
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Boolean(*b),
            Constant::Number(n) => Value::Number(*n),
            Constant::Str(s) => Value::Obj(self.intern(s).handle),
            Constant::Function(proto) => Value::Obj(self.publish_function(proto, module)),
            Constant::Native(native) => {
                let defaults: Vec<Value> = native
                    .defaults
                    .iter()
                    .map(|constant| self.publish_constant(constant, module))
                    .collect();
                let name = self.intern(&native.name).handle;
                Value::Obj(self.alloc(HeapObject::Native(Native {
                    proto: Proto {
                        name,
                        module,
                        arity: native.arity,
                        defaults: defaults.into_boxed_slice(),
                        vararg: native.vararg,
                    },
                    func: None,
                })))
            }
        }
    }

    /// Publishes `proto` into `module` and wraps it in a closure without upvalues.
    pub(crate) fn new_closure_for(&mut self, proto: &FunctionProto, module: GcHandle) -> GcHandle {
        self.with_gc_disabled(|vm| {
            let function = vm.publish_function(proto, module);
            vm.alloc(HeapObject::Closure(Closure {
                function,
                upvalues: Box::new([]),
            }))
        })
    }

    // -- Garbage collection --

    /// Runs `f` with automatic collection suspended, restoring the previous
    /// setting afterwards. Explicit [`Self::collect_garbage`] calls still run.
    pub fn with_gc_disabled<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let enabled = self.heap.is_enabled();
        self.heap.set_enabled(false);
        let result = f(self);
        self.heap.set_enabled(enabled);
        result
    }

    pub fn set_gc_enabled(&mut self, enabled: bool) {
        self.heap.set_enabled(enabled);
    }

    /// Runs a full collection cycle.
    pub fn collect_garbage(&mut self) {
        self.collect_garbage_with(None, None);
    }

    fn collect_garbage_with(&mut self, pending: Option<&HeapObject>, class: Option<GcHandle>) {
        self.heap.begin_cycle();

        if let Some(object) = pending {
            self.heap.mark_children_of(object);
        }
        if let Some(class) = class {
            self.heap.mark_handle(class);
        }
        self.mark_roots();
        self.heap.trace_references();

        let heap = &self.heap;
        self.strings.retain(|key, _| heap.is_marked(key.handle));

        self.heap.sweep();
        self.heap.finish_cycle();
    }

    fn mark_roots(&mut self) {
        for &value in &self.stack {
            self.heap.mark_value(value);
        }
        for frame in &self.frames {
            self.heap.mark_handle(frame.callable);
            self.heap.mark_handle(frame.module);
        }
        for &(_, upvalue) in &self.open_upvalues {
            self.heap.mark_handle(upvalue);
        }
        for class in self.core.all() {
            self.heap.mark_handle(class);
        }
        self.heap.mark_handle(self.core_module);
        for key in self.names {
            self.heap.mark_handle(key.handle);
        }

        let mut modules = Vec::new();
        self.modules.trace(&mut modules);
        for handle in modules {
            self.heap.mark_handle(handle);
        }
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// Allocation, cycle and heap report. Requires the `gc-telemetry` feature.
    #[cfg(feature = "gc-telemetry")]
    pub fn telemetry_report(&self) -> String {
        self.heap.telemetry().report(&self.heap.snapshot(10))
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

/// Class an object of this kind gets at allocation. Instances and upvalues
/// have none implied.
fn default_class(core: &CoreClasses, object: &HeapObject) -> Option<GcHandle> {
    Some(match object {
        HeapObject::String(_) => core.string,
        HeapObject::Function(_)
        | HeapObject::Native(_)
        | HeapObject::Closure(_)
        | HeapObject::BoundMethod(_) => core.function,
        HeapObject::Class(_) => core.class,
        HeapObject::Module(_) => core.module,
        HeapObject::List(_) => core.list,
        HeapObject::Tuple(_) => core.tuple,
        HeapObject::Table(_) => core.table,
        HeapObject::StackTrace(_) => core.stack_trace,
        HeapObject::Instance(_) | HeapObject::Upvalue(_) => return None,
    })
}

#[cfg(test)]
mod dispatch_test;
