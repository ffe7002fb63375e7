use crate::runtime::{
    Raised,
    frame::Frame,
    gc::{GcHandle, HeapObject},
    hashtable::StrKey,
    object::{BoundMethod, Instance, Proto, Tuple},
    value::Value,
};

use super::{Name, VM};

const MAX_UNPACKED_ARGS: usize = 255;

impl VM {
    // Closures only get a frame here; natives run to completion.
    pub(crate) fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), Raised> {
        let Value::Obj(handle) = callee else {
            return Err(self.not_callable(callee));
        };
        match self.heap.get(handle) {
            HeapObject::Closure(_) => self.call_closure(handle, argc),
            HeapObject::Native(_) => self.call_native(handle, argc),
            HeapObject::BoundMethod(bound) => {
                let BoundMethod { receiver, method } = *bound;
                let slot = self.stack.len() - argc as usize - 1;
                self.stack[slot] = receiver;
                self.call_value(Value::Obj(method), argc)
            }
            HeapObject::Class(_) => self.construct(handle, argc),
            _ => Err(self.not_callable(callee)),
        }
    }

    #[cold]
    fn not_callable(&mut self, callee: Value) -> Raised {
        let type_name = self.type_name_of(callee);
        self.raise(
            "TypeException",
            format!("Object {} is not a callable.", type_name),
        )
    }

    fn construct(&mut self, class: GcHandle, argc: u8) -> Result<(), Raised> {
        if self.core.is_non_instantiable(class) {
            let name = self.class_name(class).into_owned();
            return Err(self.raise(
                "Exception",
                format!("class {} can't be directly instantiated", name),
            ));
        }

        let slot = self.stack.len() - argc as usize - 1;
        if self.core.is_instantiable_builtin(class) {
            self.stack[slot] = Value::Null;
        } else {
            let instance = self.alloc_with_class(HeapObject::Instance(Instance::default()), Some(class));
            self.stack[slot] = Value::Obj(instance);
        }

        match self.lookup_method(class, self.name(Name::Ctor)) {
            Some(ctor) => self.call_value(ctor, argc),
            None if argc != 0 => {
                let name = self.class_name(class).into_owned();
                Err(self.raise(
                    "TypeException",
                    format!(
                        "Function {}.new() Expected 0 args, but instead `{}` supplied.",
                        name, argc
                    ),
                ))
            }
            None => Ok(()),
        }
    }

    pub(super) fn proto_of(&self, callable: GcHandle) -> &Proto {
        match self.heap.get(callable) {
            HeapObject::Function(f) => &f.proto,
            HeapObject::Native(n) => &n.proto,
            HeapObject::Closure(c) => self.proto_of(c.function),
            other => panic!("{} has no prototype", other.kind()),
        }
    }

    pub(super) fn qualified_name(&self, callable: GcHandle) -> String {
        let proto = self.proto_of(callable);
        format!("{}.{}", self.module_name(proto.module), self.str_of(proto.name))
    }

    fn check_overflow(&mut self) -> Result<(), Raised> {
        if self.frames.len() + 1 >= self.config.max_frames {
            return Err(self.raise("StackOverflowException", "Exceeded maximum recursion depth"));
        }
        Ok(())
    }

    // Returns the argument slots the callee's frame sees.
    fn adjust_arguments(&mut self, callable: GcHandle, argc: u8) -> Result<usize, Raised> {
        let (most, least, vararg) = {
            let proto = self.proto_of(callable);
            (proto.arity as usize, proto.required() as usize, proto.vararg)
        };
        let argc = argc as usize;

        if !vararg && argc > most {
            let quantity = if most == least { "exactly" } else { "at most" };
            return Err(self.arity_error(callable, quantity, most, argc));
        }
        if argc < least {
            let quantity = if most == least && !vararg {
                "exactly"
            } else {
                "at least"
            };
            return Err(self.arity_error(callable, quantity, least, argc));
        }

        if argc < most {
            for i in (argc - least)..(most - least) {
                let value = self.proto_of(callable).defaults[i];
                self.push(value);
            }
        }

        if vararg {
            let extra = argc.saturating_sub(most);
            let start = self.stack.len() - extra;
            let items: Box<[Value]> = self.stack[start..].into();
            let tuple = self.alloc(HeapObject::Tuple(Tuple { items }));
            self.stack.truncate(start);
            self.push(Value::Obj(tuple));
        }

        Ok(most + vararg as usize)
    }

    #[cold]
    fn arity_error(&mut self, callable: GcHandle, quantity: &str, expected: usize, supplied: usize) -> Raised {
        let name = self.qualified_name(callable);
        self.raise(
            "TypeException",
            format!(
                "Function `{}` takes {} {} arguments, {} supplied.",
                name, quantity, expected, supplied
            ),
        )
    }

    fn call_closure(&mut self, closure: GcHandle, argc: u8) -> Result<(), Raised> {
        self.check_overflow()?;
        let slots = self.adjust_arguments(closure, argc)?;

        let HeapObject::Closure(c) = self.heap.get(closure) else {
            unreachable!("call_closure on a non-closure");
        };
        let HeapObject::Function(function) = self.heap.get(c.function) else {
            unreachable!("closure over a non-function");
        };
        let chunk = function.chunk.clone();
        let module = function.proto.module;

        let base = self.stack.len() - slots - 1;
        self.frames.push(Frame::new(closure, Some(chunk), base, module));
        Ok(())
    }

    fn call_native(&mut self, native: GcHandle, argc: u8) -> Result<(), Raised> {
        self.check_overflow()?;
        let slots = self.adjust_arguments(native, argc)?;

        let HeapObject::Native(n) = self.heap.get(native) else {
            unreachable!("call_native on a non-native");
        };
        let func = n.func;
        let module = n.proto.module;

        let base = self.stack.len() - slots - 1;
        let args_top = self.stack.len();
        self.frames.push(Frame::new(native, None, base, module));

        let Some(func) = func else {
            let name = self.qualified_name(native);
            return Err(self.raise("Exception", format!("Cannot resolve native {}().", name)));
        };

        let saved_base = self.api_base;
        self.api_base = base;
        let result = func(self);
        self.api_base = saved_base;

        // On error the frame stays so unwinding can record it.
        result?;

        let ret = if self.stack.len() > args_top {
            self.pop()
        } else {
            Value::Null
        };
        self.frames.pop();
        self.stack.truncate(base);
        self.push(ret);
        Ok(())
    }

    pub(crate) fn invoke_value(&mut self, name: StrKey, argc: u8) -> Result<(), Raised> {
        let receiver = self.peek(argc as usize);

        match self.object(receiver) {
            Some(HeapObject::Instance(instance)) => {
                let field = instance.fields.get(name);
                let class = self.class_of_value(receiver);
                if let Some(method) = self.lookup_method(class, name) {
                    return self.call_value(method, argc);
                }
                if let Some(field) = field {
                    return self.call_value(field, argc);
                }
                Err(self.missing_method(class, name))
            }
            Some(HeapObject::Module(module)) => {
                let global = module.globals.get(name);
                if let Some(method) = self.lookup_method(self.core.module, name) {
                    return self.call_value(method, argc);
                }
                if let Some(global) = global {
                    let slot = self.stack.len() - argc as usize - 1;
                    self.stack[slot] = global;
                    return self.call_value(global, argc);
                }
                let module_name = self.module_name(receiver.as_obj().unwrap_or(self.core_module));
                let message = format!(
                    "Name `{}` is not defined in module {}.",
                    self.key_str(name),
                    module_name
                );
                Err(self.raise("NameException", message))
            }
            _ => {
                let class = self.class_of_value(receiver);
                match self.lookup_method(class, name) {
                    Some(method) => self.call_value(method, argc),
                    None => Err(self.missing_method(class, name)),
                }
            }
        }
    }

    pub(super) fn super_invoke(&mut self, superclass: Value, name: StrKey, argc: u8) -> Result<(), Raised> {
        let class = superclass.as_obj().unwrap_or(self.core.object);
        match self.lookup_method(class, name) {
            Some(method) => self.call_value(method, argc),
            None => Err(self.missing_method(class, name)),
        }
    }

    #[cold]
    pub(super) fn missing_method(&mut self, class: GcHandle, name: StrKey) -> Raised {
        let message = format!(
            "Method {}.{}() doesn't exists",
            self.class_name(class),
            self.key_str(name)
        );
        self.raise("MethodException", message)
    }

    // Stack is untouched when `class` has no such method.
    pub(super) fn bind_method(&mut self, class: GcHandle, name: StrKey) -> bool {
        let Some(Value::Obj(method)) = self.lookup_method(class, name) else {
            return false;
        };
        let receiver = self.peek(0);
        let bound = self.alloc(HeapObject::BoundMethod(BoundMethod { receiver, method }));
        self.set_peek(0, Value::Obj(bound));
        true
    }

    pub(super) fn unpack_arguments(&mut self) -> Result<u8, Raised> {
        let value = self.peek(0);
        let items: Vec<Value> = if let Some(list) = self.as_list(value) {
            list.items.clone()
        } else if let Some(tuple) = self.as_tuple(value) {
            tuple.items.to_vec()
        } else {
            let type_name = self.type_name_of(value);
            return Err(self.raise(
                "TypeException",
                format!("Can unpack only Tuple or List, got {}.", type_name),
            ));
        };

        if items.len() >= MAX_UNPACKED_ARGS {
            return Err(self.raise(
                "TypeException",
                format!("Too many arguments for function call: {}", items.len()),
            ));
        }

        self.pop();
        let argc = items.len() as u8;
        self.stack.extend(items);
        Ok(argc)
    }
}
