use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::environment::ScopeRef;
use crate::parser::ast::{Param, Stmt};

/// Runtime values. Lists and variant groups are shared mutable containers;
/// everything else is cheap to clone.
#[derive(Debug, Clone)]
pub enum Value {
    /// The value of an empty binding (`$x: ;`) before the slot is typed.
    Empty,
    Number(f64),
    Text(String),
    List(Rc<RefCell<EnzoList>>),
    Function(Rc<EnzoFunction>),
    Blueprint(Rc<Blueprint>),
    VariantGroup(Rc<RefCell<VariantGroup>>),
    Variant { group: String, tag: String },
}

/// Hybrid array/record container: ordered elements plus a name-to-index
/// side map. Numeric addressing from source is 1-based and goes to the
/// position, never to the side map.
#[derive(Debug, Clone, Default)]
pub struct EnzoList {
    pub elements: Vec<Value>,
    pub keys: HashMap<String, usize>,
    /// Blueprint name when this list is an instance.
    pub blueprint: Option<String>,
}

impl EnzoList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: Value) {
        self.elements.push(value);
    }

    pub fn push_keyed(&mut self, key: &str, value: Value) {
        match self.keys.get(key) {
            Some(&index) => self.elements[index] = value,
            None => {
                self.elements.push(value);
                self.keys.insert(key.to_string(), self.elements.len() - 1);
            }
        }
    }

    pub fn get_keyed(&self, key: &str) -> Option<&Value> {
        self.keys.get(key).map(|&index| &self.elements[index])
    }

    pub fn key_of(&self, index: usize) -> Option<&str> {
        self.keys
            .iter()
            .find(|(_, &i)| i == index)
            .map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// A function value: parameters, body, and the scope captured at
/// definition time. Invocation builds a fresh child frame over `closure`.
#[derive(Debug)]
pub struct EnzoFunction {
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub closure: ScopeRef,
}

/// Named field-default schema. Methods are plain function-valued fields;
/// composition merges two schemas with the right side winning.
#[derive(Debug, Clone)]
pub struct Blueprint {
    pub name: String,
    pub fields: Vec<(String, Value)>,
}

impl Blueprint {
    pub fn compose(&self, other: &Blueprint) -> Blueprint {
        let mut fields = self.fields.clone();
        for (name, value) in &other.fields {
            match fields.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = value.clone(),
                None => fields.push((name.clone(), value.clone())),
            }
        }
        Blueprint {
            name: format!("{}-{}", self.name, other.name),
            fields,
        }
    }
}

/// A named, ordered, extensible set of tags. Re-declaring a group merges
/// new tags in without dropping the existing ones.
#[derive(Debug, Clone)]
pub struct VariantGroup {
    pub name: String,
    pub tags: Vec<String>,
}

impl VariantGroup {
    pub fn extend_tags(&mut self, tags: &[String]) {
        for tag in tags {
            if !self.tags.iter().any(|t| t == tag) {
                self.tags.push(tag.clone());
            }
        }
    }
}

/// Runtime type of a value, used for type-locking rebinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Empty,
    Number,
    Text,
    List,
    BlueprintInstance,
    Function,
    Blueprint,
    VariantGroup,
    Variant,
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Empty => "Empty",
            Self::Number => "Number",
            Self::Text => "Text",
            Self::List => "List",
            Self::BlueprintInstance => "Blueprint instance",
            Self::Function => "Function",
            Self::Blueprint => "Blueprint",
            Self::VariantGroup => "Variant group",
            Self::Variant => "Variant",
        };
        write!(f, "{name}")
    }
}

impl Value {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Empty => TypeTag::Empty,
            Value::Number(_) => TypeTag::Number,
            Value::Text(_) => TypeTag::Text,
            Value::List(list) => {
                if list.borrow().blueprint.is_some() {
                    TypeTag::BlueprintInstance
                } else {
                    TypeTag::List
                }
            }
            Value::Function(_) => TypeTag::Function,
            Value::Blueprint(_) => TypeTag::Blueprint,
            Value::VariantGroup(_) => TypeTag::VariantGroup,
            Value::Variant { .. } => TypeTag::Variant,
        }
    }

    /// Falsy: 0, empty Text, Empty, the False tag, an empty List, and a
    /// List whose every element is falsy. Lists can contain themselves
    /// after an in-place rebind, so recursion carries a visited set; a
    /// revisited container counts as truthy.
    pub fn truthy(&self) -> bool {
        self.truthy_guarded(&mut Vec::new())
    }

    fn truthy_guarded(&self, seen: &mut Vec<*const RefCell<EnzoList>>) -> bool {
        match self {
            Value::Empty => false,
            Value::Number(n) => *n != 0.0,
            Value::Text(t) => !t.is_empty(),
            Value::List(list) => {
                let ptr = Rc::as_ptr(list);
                if seen.contains(&ptr) {
                    return true;
                }
                seen.push(ptr);
                let result = list
                    .borrow()
                    .elements
                    .iter()
                    .any(|element| element.truthy_guarded(seen));
                seen.pop();
                result
            }
            Value::Function(_) => true,
            Value::Blueprint(_) => true,
            Value::VariantGroup(_) => true,
            Value::Variant { tag, .. } => tag != "False",
        }
    }

    /// Structural equality for `is`: element-wise on lists, identity on
    /// functions. A list pair already under comparison is taken as equal,
    /// so self-referential lists terminate.
    pub fn structural_eq(&self, other: &Value) -> bool {
        self.structural_eq_guarded(other, &mut Vec::new())
    }

    fn structural_eq_guarded(
        &self,
        other: &Value,
        seen: &mut Vec<(*const RefCell<EnzoList>, *const RefCell<EnzoList>)>,
    ) -> bool {
        match (self, other) {
            (Value::Empty, Value::Empty) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Rc::as_ptr(a), Rc::as_ptr(b));
                if seen.contains(&pair) {
                    return true;
                }
                seen.push(pair);
                let (a, b) = (a.borrow(), b.borrow());
                let result = a.blueprint == b.blueprint
                    && a.elements.len() == b.elements.len()
                    && a.elements
                        .iter()
                        .zip(b.elements.iter())
                        .all(|(x, y)| x.structural_eq_guarded(y, seen));
                seen.pop();
                result
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Blueprint(a), Value::Blueprint(b)) => Rc::ptr_eq(a, b),
            (
                Value::Variant { group, tag },
                Value::Variant {
                    group: other_group,
                    tag: other_tag,
                },
            ) => group == other_group && tag == other_tag,
            _ => false,
        }
    }

    /// Display body with a visited set; a list already being printed shows
    /// as `[...]` instead of recursing forever.
    fn fmt_guarded(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        seen: &mut Vec<*const RefCell<EnzoList>>,
    ) -> std::fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Text(t) => write!(f, "{t}"),
            Value::List(list) => {
                let ptr = Rc::as_ptr(list);
                if seen.contains(&ptr) {
                    return write!(f, "[...]");
                }
                seen.push(ptr);
                let list = list.borrow();
                if let Some(name) = &list.blueprint {
                    write!(f, "{name}")?;
                }
                write!(f, "[")?;
                for (i, element) in list.elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if let Some(key) = list.key_of(i) {
                        write!(f, "{key}: ")?;
                    }
                    match element {
                        Value::Text(t) => write!(f, "\"{t}\"")?,
                        other => other.fmt_guarded(f, seen)?,
                    }
                }
                write!(f, "]")?;
                seen.pop();
                Ok(())
            }
            Value::Function(func) => {
                let params: Vec<&str> = func.params.iter().map(|p| p.name.as_str()).collect();
                write!(f, "<function ({})>", params.join(", "))
            }
            Value::Blueprint(bp) => write!(f, "<blueprint {}>", bp.name),
            Value::VariantGroup(group) => {
                let group = group.borrow();
                write!(f, "<variants {}: {}>", group.name, group.tags.join(", "))
            }
            Value::Variant { tag, .. } => write!(f, "{tag}"),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_guarded(f, &mut Vec::new())
    }
}
