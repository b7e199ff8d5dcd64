use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::error::RuntimeError;
use super::value::{TypeTag, Value, VariantGroup};

pub type ScopeRef = Rc<RefCell<Scope>>;

/// One frame in the lexical scope chain. A name resolves to the nearest
/// enclosing frame that defines it; rebinds mutate the owning frame.
#[derive(Debug)]
pub struct Scope {
    slots: HashMap<String, Slot>,
    parent: Option<ScopeRef>,
}

#[derive(Debug)]
struct Slot {
    value: Value,
    /// The runtime type that locked this slot. `None` until the first
    /// non-empty value is stored.
    locked: Option<TypeTag>,
}

impl Scope {
    /// The program root, pre-seeded with the built-in variant groups.
    pub fn root() -> ScopeRef {
        let scope = Rc::new(RefCell::new(Scope {
            slots: HashMap::new(),
            parent: None,
        }));
        let boolean = Rc::new(RefCell::new(VariantGroup {
            name: "Boolean".to_string(),
            tags: vec!["True".to_string(), "False".to_string()],
        }));
        let status = Rc::new(RefCell::new(VariantGroup {
            name: "Status".to_string(),
            tags: vec!["True".to_string(), "False".to_string()],
        }));
        {
            let mut root = scope.borrow_mut();
            root.insert("Boolean", Value::VariantGroup(boolean));
            root.insert("Status", Value::VariantGroup(status));
            root.insert(
                "True",
                Value::Variant {
                    group: "Boolean".to_string(),
                    tag: "True".to_string(),
                },
            );
            root.insert(
                "False",
                Value::Variant {
                    group: "Boolean".to_string(),
                    tag: "False".to_string(),
                },
            );
        }
        scope
    }

    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            slots: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    fn insert(&mut self, name: &str, value: Value) {
        let locked = match value.type_tag() {
            TypeTag::Empty => None,
            tag => Some(tag),
        };
        self.slots.insert(name.to_string(), Slot { value, locked });
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// First definition of a name in this frame. Shadowing an outer frame
    /// is allowed; redefining in the same frame is not.
    pub fn define(scope: &ScopeRef, name: &str, value: Value) -> Result<(), RuntimeError> {
        let mut frame = scope.borrow_mut();
        if frame.has_local(name) {
            return Err(RuntimeError::AlreadyDefined(name.to_string()));
        }
        frame.insert(name, value);
        Ok(())
    }

    pub fn lookup(scope: &ScopeRef, name: &str) -> Option<Value> {
        let frame = scope.borrow();
        if let Some(slot) = frame.slots.get(name) {
            return Some(slot.value.clone());
        }
        frame
            .parent
            .as_ref()
            .and_then(|parent| Scope::lookup(parent, name))
    }

    /// Rebind the nearest frame that owns `name`, enforcing the type lock.
    /// When no frame owns it, the rebind degrades to a fresh binding in the
    /// current frame.
    pub fn rebind(scope: &ScopeRef, name: &str, value: Value) -> Result<(), RuntimeError> {
        if Scope::rebind_owned(scope, name, &value)? {
            return Ok(());
        }
        scope.borrow_mut().insert(name, value);
        Ok(())
    }

    fn rebind_owned(scope: &ScopeRef, name: &str, value: &Value) -> Result<bool, RuntimeError> {
        let mut frame = scope.borrow_mut();
        if let Some(slot) = frame.slots.get_mut(name) {
            let new_tag = value.type_tag();
            match slot.locked {
                Some(old) if new_tag != TypeTag::Empty && new_tag != old => {
                    return Err(RuntimeError::CannotAssign { new: new_tag, old });
                }
                Some(_) => {}
                None => {
                    if new_tag != TypeTag::Empty {
                        slot.locked = Some(new_tag);
                    }
                }
            }
            // Rebinding a list replaces the shared container's contents in
            // place, so every holder of the container (a running live loop
            // included) observes the new elements.
            if let (Value::List(existing), Value::List(new)) = (&slot.value, value) {
                if !Rc::ptr_eq(existing, new) {
                    let contents = new.borrow().clone();
                    *existing.borrow_mut() = contents;
                }
                return Ok(true);
            }
            slot.value = value.clone();
            return Ok(true);
        }
        match &frame.parent {
            Some(parent) => {
                let parent = Rc::clone(parent);
                drop(frame);
                Scope::rebind_owned(&parent, name, value)
            }
            None => Ok(false),
        }
    }
}
