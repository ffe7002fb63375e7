use crate::runtime::{Raised, gc::HeapObject, hashtable::StrKey, value::Value};

use super::VM;

impl VM {
    /// `GET_FIELD`: replaces the object on top of the stack with its field
    /// `name`, a global when the object is a module, or a bound method.
    pub(crate) fn get_field_key(&mut self, name: StrKey) -> Result<(), Raised> {
        let object = self.peek(0);

        match self.object(object) {
            Some(HeapObject::Instance(instance)) => {
                if let Some(value) = instance.fields.get(name) {
                    self.set_peek(0, value);
                    return Ok(());
                }
                let class = self.class_of_value(object);
                if self.bind_method(class, name) {
                    return Ok(());
                }
                Err(self.missing_field(object, name))
            }
            Some(HeapObject::Module(module)) => {
                if let Some(value) = module.globals.get(name) {
                    self.set_peek(0, value);
                    return Ok(());
                }
                if self.bind_method(self.core.module, name) {
                    return Ok(());
                }
                let message = match object {
                    Value::Obj(module) => format!(
                        "Name `{}` is not defined in module {}",
                        self.key_str(name),
                        self.module_name(module)
                    ),
                    _ => unreachable!(),
                };
                Err(self.raise("NameException", message))
            }
            _ => {
                let class = self.class_of_value(object);
                if self.bind_method(class, name) {
                    return Ok(());
                }
                Err(self.missing_field(object, name))
            }
        }
    }

    /// `SET_FIELD`: stores the value below the object into field `name`. The
    /// object is popped; the value stays as the expression's result.
    pub(crate) fn set_field_key(&mut self, name: StrKey) -> Result<(), Raised> {
        let object = self.pop();
        let value = self.peek(0);

        if let Some(instance) = self.as_instance_mut(object) {
            instance.fields.put(name, value);
            self.recharge(object);
            return Ok(());
        }
        if let Some(module) = self.as_module_mut(object) {
            module.globals.put(name, value);
            self.recharge(object);
            return Ok(());
        }
        Err(self.missing_field(object, name))
    }

    #[cold]
    fn missing_field(&mut self, object: Value, name: StrKey) -> Raised {
        let message = format!(
            "Object {} doesn't have field `{}`.",
            self.type_name_of(object),
            self.key_str(name)
        );
        self.raise("FieldException", message)
    }

    /// Re-measures a container after it grew.
    pub(crate) fn recharge(&mut self, value: Value) {
        if let Value::Obj(handle) = value {
            self.heap.recharge(handle);
        }
    }
}
