pub mod environment;
pub mod error;
pub mod value;

#[cfg(test)]
mod test;

use std::cell::RefCell;
use std::rc::Rc;

use crate::parser::ast::*;
use crate::parser::parse_program;
use environment::{Scope, ScopeRef};
use error::RuntimeError;
use value::{Blueprint, EnzoFunction, EnzoList, Value, VariantGroup};

/// Every evaluation step produces either a value or a control signal; the
/// caller forwards, consumes, or rejects the signal depending on the
/// construct it is evaluating.
#[derive(Debug, Clone)]
pub enum Outcome {
    Value(Value),
    Return(Value),
    EndLoop,
    RestartLoop,
}

const MAX_RECURSION_DEPTH: usize = 1000;

/// Evaluate one statement against an environment. `value_demand` surfaces a
/// bare expression statement's value to the caller (and auto-invokes bare
/// function values) instead of discarding it.
pub fn evaluate(stmt: &Stmt, env: &ScopeRef, value_demand: bool) -> Result<Outcome, RuntimeError> {
    Evaluator::new().eval_stmt(stmt, env, value_demand)
}

/// Evaluate a whole program, returning the last statement's value. Loop
/// signals cannot escape the program root.
pub fn evaluate_program(program: &Program, env: &ScopeRef) -> Result<Value, RuntimeError> {
    let mut last = Value::Empty;
    for stmt in &program.statements {
        match Evaluator::new().eval_stmt(stmt, env, true)? {
            Outcome::Value(value) | Outcome::Return(value) => last = value,
            Outcome::EndLoop => return Err(RuntimeError::SignalOutsideLoop("end-loop")),
            Outcome::RestartLoop => return Err(RuntimeError::SignalOutsideLoop("restart-loop")),
        }
    }
    Ok(last)
}

struct Evaluator {
    depth: usize,
}

impl Evaluator {
    fn new() -> Self {
        Self { depth: 0 }
    }

    fn enter(&mut self) -> Result<(), RuntimeError> {
        self.depth += 1;
        if self.depth > MAX_RECURSION_DEPTH {
            return Err(RuntimeError::RecursionLimit);
        }
        Ok(())
    }

    fn eval_stmt(
        &mut self,
        stmt: &Stmt,
        env: &ScopeRef,
        demand: bool,
    ) -> Result<Outcome, RuntimeError> {
        self.enter()?;
        let result = self.eval_stmt_inner(stmt, env, demand);
        self.depth -= 1;
        result
    }

    fn eval_stmt_inner(
        &mut self,
        stmt: &Stmt,
        env: &ScopeRef,
        demand: bool,
    ) -> Result<Outcome, RuntimeError> {
        match stmt {
            Stmt::Expr(expr) => {
                // A bare function atom statement is always invoked.
                let demand = demand || matches!(expr, Expr::FunctionAtom(_));
                Ok(Outcome::Value(self.eval_expr(expr, env, demand)?))
            }
            Stmt::Binding { name, value } => {
                let value = match value {
                    None => Value::Empty,
                    Some(expr) => self.eval_binding_value(expr, env, Some(name))?,
                };
                Scope::define(env, name, value)?;
                Ok(Outcome::Value(Value::Empty))
            }
            Stmt::Rebind { target, value } => {
                self.eval_rebind(target, value, env)?;
                Ok(Outcome::Value(Value::Empty))
            }
            Stmt::Param(_) => Err(RuntimeError::TypeError(
                "param declaration outside function atom".to_string(),
            )),
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval_expr(expr, env, true)?,
                    None => Value::Empty,
                };
                Ok(Outcome::Return(value))
            }
            Stmt::EndLoop => Ok(Outcome::EndLoop),
            Stmt::RestartLoop => Ok(Outcome::RestartLoop),
            Stmt::If(if_stmt) => self.eval_if(if_stmt, env),
            Stmt::Loop(loop_stmt) => self.eval_loop(loop_stmt, env),
            Stmt::VariantGroupDef { group, tags } => {
                self.eval_variant_group_def(group, tags, env)?;
                Ok(Outcome::Value(Value::Empty))
            }
            Stmt::Destructure { targets, source } => {
                let values = self.destructure_values(source, env, targets.len())?;
                for (target, value) in targets.iter().zip(values) {
                    let name = target.rename.as_deref().unwrap_or(&target.name);
                    Scope::define(env, name, value)?;
                }
                Ok(Outcome::Value(Value::Empty))
            }
            Stmt::ReverseDestructure { source, targets } => {
                let values = self.destructure_values(source, env, targets.len())?;
                for (target, value) in targets.iter().zip(values) {
                    let name = target.rename.as_deref().unwrap_or(&target.name);
                    Scope::rebind(env, name, value)?;
                }
                Ok(Outcome::Value(Value::Empty))
            }
        }
    }

    fn destructure_values(
        &mut self,
        source: &Expr,
        env: &ScopeRef,
        expected: usize,
    ) -> Result<Vec<Value>, RuntimeError> {
        let value = self.eval_expr(source, env, true)?;
        let list = match &value {
            Value::List(list) => list,
            other => return Err(RuntimeError::NotAList(other.to_string())),
        };
        let elements = list.borrow().elements.clone();
        if elements.len() != expected {
            return Err(RuntimeError::DestructureArity {
                expected,
                got: elements.len(),
            });
        }
        Ok(elements)
    }

    // ------------------------------------------------------------------
    // Rebinding

    fn eval_rebind(
        &mut self,
        target: &Expr,
        value: &Expr,
        env: &ScopeRef,
    ) -> Result<(), RuntimeError> {
        // `$l[] :> $a` — a single-target destructure.
        if let (Expr::Unpack(_), Expr::VarInvoke(name)) = (value, target) {
            let values = self.destructure_values(value, env, 1)?;
            return Scope::rebind(env, name, values.into_iter().next().unwrap());
        }
        let new_value = self.eval_value_no_invoke(value, env)?;
        match target {
            Expr::VarInvoke(name) => Scope::rebind(env, name, new_value),
            Expr::Index { base, index } => {
                let list = self.expect_list(base, env)?;
                let position = self.index_position(index, env, &list)?;
                list.borrow_mut().elements[position] = new_value;
                Ok(())
            }
            Expr::Property { base, name } => {
                let list = self.expect_list(base, env)?;
                let index = match list.borrow().keys.get(name) {
                    Some(&index) => index,
                    None => return Err(RuntimeError::PropertyNotFound(name.clone())),
                };
                list.borrow_mut().elements[index] = new_value;
                Ok(())
            }
            // `[...] :> $l[]` writes elements positionally into the list,
            // keeping its key map and blueprint tag.
            Expr::Unpack(inner) => {
                let target_list = self.expect_list(inner, env)?;
                let source_list = match &new_value {
                    Value::List(list) => list.borrow().elements.clone(),
                    other => return Err(RuntimeError::NotAList(other.to_string())),
                };
                let expected = target_list.borrow().len();
                if source_list.len() != expected {
                    return Err(RuntimeError::DestructureArity {
                        expected,
                        got: source_list.len(),
                    });
                }
                target_list.borrow_mut().elements = source_list;
                Ok(())
            }
            _ => Err(RuntimeError::TypeError("invalid rebind target".to_string())),
        }
    }

    fn expect_list(
        &mut self,
        expr: &Expr,
        env: &ScopeRef,
    ) -> Result<Rc<RefCell<EnzoList>>, RuntimeError> {
        match self.eval_expr(expr, env, true)? {
            Value::List(list) => Ok(list),
            other => Err(RuntimeError::NotAList(other.to_string())),
        }
    }

    /// Resolve a 1-based index expression to a 0-based position, with
    /// bounds and integrality checks.
    fn index_position(
        &mut self,
        index: &Expr,
        env: &ScopeRef,
        list: &Rc<RefCell<EnzoList>>,
    ) -> Result<usize, RuntimeError> {
        let index = match self.eval_expr(index, env, true)? {
            Value::Number(n) => n,
            Value::Text(_) => return Err(RuntimeError::IndexMustBeNumber),
            _ => return Err(RuntimeError::IndexMustBeNumber),
        };
        if index.fract() != 0.0 {
            return Err(RuntimeError::IndexMustBeInteger);
        }
        let position = index as i64;
        if position < 1 || position as usize > list.borrow().len() {
            return Err(RuntimeError::ListIndexOutOfRange);
        }
        Ok(position as usize - 1)
    }

    // ------------------------------------------------------------------
    // Control flow

    fn eval_if(&mut self, if_stmt: &IfStatement, env: &ScopeRef) -> Result<Outcome, RuntimeError> {
        let mut fired = false;
        for (condition, block) in &if_stmt.branches {
            if self.eval_expr(condition, env, true)?.truthy() {
                fired = true;
                let scope = Scope::child(env);
                match self.eval_block(block, &scope)? {
                    Outcome::Value(_) => {}
                    signal => return Ok(signal),
                }
                if if_stmt.exclusive {
                    break;
                }
            }
        }
        if !fired {
            if let Some(block) = &if_stmt.else_block {
                let scope = Scope::child(env);
                match self.eval_block(block, &scope)? {
                    Outcome::Value(_) => {}
                    signal => return Ok(signal),
                }
            }
        }
        Ok(Outcome::Value(Value::Empty))
    }

    fn eval_loop(
        &mut self,
        loop_stmt: &LoopStatement,
        env: &ScopeRef,
    ) -> Result<Outcome, RuntimeError> {
        match &loop_stmt.kind {
            LoopKind::Bare => {
                loop {
                    let scope = Scope::child(env);
                    match self.eval_block(&loop_stmt.body, &scope)? {
                        Outcome::EndLoop => break,
                        Outcome::RestartLoop | Outcome::Value(_) => {}
                        signal @ Outcome::Return(_) => return Ok(signal),
                    }
                }
                Ok(Outcome::Value(Value::Empty))
            }
            LoopKind::While(condition) => {
                loop {
                    if !self.eval_expr(condition, env, true)?.truthy() {
                        break;
                    }
                    let scope = Scope::child(env);
                    match self.eval_block(&loop_stmt.body, &scope)? {
                        Outcome::EndLoop => break,
                        Outcome::RestartLoop | Outcome::Value(_) => {}
                        signal @ Outcome::Return(_) => return Ok(signal),
                    }
                }
                Ok(Outcome::Value(Value::Empty))
            }
            LoopKind::For {
                var,
                by_reference,
                source,
            } => {
                let list = match self.eval_expr(source, env, true)? {
                    Value::List(list) => list,
                    other => return Err(RuntimeError::NotAList(other.to_string())),
                };
                // Live iteration: the bound is re-read every step, so the
                // body's insertions and deletions are visible to later
                // steps. The cursor always advances by one.
                let mut cursor = 0usize;
                while cursor < list.borrow().len() {
                    let element = list.borrow().elements[cursor].clone();
                    let scope = Scope::child(env);
                    Scope::define(&scope, var, element)?;
                    let outcome = self.eval_block(&loop_stmt.body, &scope)?;
                    if *by_reference {
                        if let Some(value) = Scope::lookup(&scope, var) {
                            let mut borrowed = list.borrow_mut();
                            if cursor < borrowed.len() {
                                borrowed.elements[cursor] = value;
                            }
                        }
                    }
                    match outcome {
                        Outcome::EndLoop => break,
                        Outcome::RestartLoop | Outcome::Value(_) => {}
                        signal @ Outcome::Return(_) => return Ok(signal),
                    }
                    cursor += 1;
                }
                Ok(Outcome::Value(Value::Empty))
            }
        }
    }

    /// Run a block in its scope; the last statement's value is the block's
    /// value, any signal short-circuits.
    fn eval_block(&mut self, block: &[Stmt], scope: &ScopeRef) -> Result<Outcome, RuntimeError> {
        let mut last = Value::Empty;
        for (i, stmt) in block.iter().enumerate() {
            let demand = i + 1 == block.len();
            match self.eval_stmt(stmt, scope, demand)? {
                Outcome::Value(value) => last = value,
                signal => return Ok(signal),
            }
        }
        Ok(Outcome::Value(last))
    }

    fn eval_variant_group_def(
        &mut self,
        group: &str,
        tags: &[String],
        env: &ScopeRef,
    ) -> Result<(), RuntimeError> {
        match Scope::lookup(env, group) {
            Some(Value::VariantGroup(existing)) => {
                existing.borrow_mut().extend_tags(tags);
                Ok(())
            }
            Some(_) => Err(RuntimeError::TypeError(format!(
                "{group} is not a variant group"
            ))),
            None => {
                let new_group = VariantGroup {
                    name: group.to_string(),
                    tags: tags.to_vec(),
                };
                Scope::define(env, group, Value::VariantGroup(Rc::new(RefCell::new(new_group))))
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions

    fn eval_expr(
        &mut self,
        expr: &Expr,
        env: &ScopeRef,
        demand: bool,
    ) -> Result<Value, RuntimeError> {
        self.enter()?;
        let result = self.eval_expr_inner(expr, env, demand);
        self.depth -= 1;
        result
    }

    fn eval_expr_inner(
        &mut self,
        expr: &Expr,
        env: &ScopeRef,
        demand: bool,
    ) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Text(raw) => Ok(Value::Text(self.interpolate(raw, env)?)),
            Expr::VarInvoke(name) => {
                let value = Scope::lookup(env, name)
                    .ok_or_else(|| RuntimeError::UnknownVariable(name.clone()))?;
                if demand {
                    if let Value::Function(func) = &value {
                        return self.invoke_function(&Rc::clone(func), vec![], None);
                    }
                }
                Ok(value)
            }
            Expr::FunctionRef(name) => Scope::lookup(env, name)
                .ok_or_else(|| RuntimeError::UnknownVariable(name.clone())),
            Expr::ListAtom(items) => self.eval_list_atom(items, env),
            Expr::TableAtom(items) => {
                let mut list = EnzoList::new();
                for (key, value) in items {
                    let value = self.eval_expr(value, env, true)?;
                    list.push_keyed(key, value);
                }
                Ok(Value::List(Rc::new(RefCell::new(list))))
            }
            Expr::BlueprintAtom(fields) => self.eval_blueprint_atom(fields, "anonymous", env),
            Expr::BlueprintInstantiate { name, fields } => {
                self.eval_instantiate(name, fields, env)
            }
            Expr::FunctionAtom(atom) => {
                let func = Value::Function(Rc::new(EnzoFunction {
                    params: atom.params.clone(),
                    body: atom.body.clone(),
                    closure: Rc::clone(env),
                }));
                if demand {
                    if let Value::Function(func) = &func {
                        return self.invoke_function(&Rc::clone(func), vec![], None);
                    }
                }
                Ok(func)
            }
            Expr::Invoke { callee, args } => self.eval_invoke(callee, args, env),
            Expr::Index { base, index } => {
                let list = match self.eval_expr(base, env, true)? {
                    Value::List(list) => list,
                    _ => {
                        return Err(RuntimeError::TypeError("index applies to lists".to_string()))
                    }
                };
                let position = self.index_position(index, env, &list)?;
                let value = list.borrow().elements[position].clone();
                Ok(value)
            }
            Expr::Property { base, name } => self.eval_property(base, name, env),
            Expr::Unpack(inner) => {
                let value = self.eval_expr(inner, env, true)?;
                match value {
                    Value::List(_) => Ok(value),
                    other => Err(RuntimeError::NotAList(other.to_string())),
                }
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right, env),
            Expr::Not(inner) => {
                let value = self.eval_expr(inner, env, true)?;
                Ok(boolean(!value.truthy()))
            }
            Expr::Pipeline { head, stages } => self.eval_pipeline(head, stages, env),
        }
    }

    fn eval_list_atom(&mut self, items: &[ListItem], env: &ScopeRef) -> Result<Value, RuntimeError> {
        let mut list = EnzoList::new();
        for item in items {
            match item {
                // Elements sit in value position: a bare `$f` or function
                // atom is invoked, `@f` keeps the function itself.
                ListItem::Value(expr) => {
                    let value = self.eval_expr(expr, env, true)?;
                    list.push(value);
                }
                ListItem::KeyValue { key, value } => {
                    let value = self.eval_expr(value, env, true)?;
                    list.push_keyed(key, value);
                }
                ListItem::Spread(expr) => match self.eval_expr(expr, env, true)? {
                    Value::List(source) => {
                        for element in source.borrow().elements.iter() {
                            list.push(element.clone());
                        }
                    }
                    other => return Err(RuntimeError::NotAList(other.to_string())),
                },
            }
        }
        Ok(Value::List(Rc::new(RefCell::new(list))))
    }

    fn eval_blueprint_atom(
        &mut self,
        fields: &[(String, Expr)],
        name: &str,
        env: &ScopeRef,
    ) -> Result<Value, RuntimeError> {
        let mut evaluated = vec![];
        for (field, default) in fields {
            let value = self.eval_value_no_invoke(default, env)?;
            evaluated.push((field.clone(), value));
        }
        Ok(Value::Blueprint(Rc::new(Blueprint {
            name: name.to_string(),
            fields: evaluated,
        })))
    }

    fn eval_instantiate(
        &mut self,
        name: &str,
        fields: &[(String, Expr)],
        env: &ScopeRef,
    ) -> Result<Value, RuntimeError> {
        let blueprint = match Scope::lookup(env, name) {
            Some(Value::Blueprint(bp)) => bp,
            Some(_) => {
                return Err(RuntimeError::TypeError(format!("{name} is not a blueprint")))
            }
            None => return Err(RuntimeError::UnknownVariable(name.to_string())),
        };
        let mut list = EnzoList::new();
        for (field, default) in &blueprint.fields {
            list.push_keyed(field, default.clone());
        }
        // Supplied fields overwrite defaults; unknown fields are accepted,
        // the schema is advisory.
        for (field, expr) in fields {
            let value = self.eval_value_no_invoke(expr, env)?;
            list.push_keyed(field, value);
        }
        list.blueprint = Some(blueprint.name.clone());
        Ok(Value::List(Rc::new(RefCell::new(list))))
    }

    fn eval_property(
        &mut self,
        base: &Expr,
        name: &str,
        env: &ScopeRef,
    ) -> Result<Value, RuntimeError> {
        match self.eval_expr(base, env, false)? {
            Value::VariantGroup(group) => {
                let group = group.borrow();
                if group.tags.iter().any(|t| t == name) {
                    Ok(Value::Variant {
                        group: group.name.clone(),
                        tag: name.to_string(),
                    })
                } else {
                    Err(RuntimeError::UnknownVariantTag {
                        group: group.name.clone(),
                        tag: name.to_string(),
                    })
                }
            }
            Value::List(list) => match list.borrow().get_keyed(name) {
                Some(value) => Ok(value.clone()),
                None => Err(RuntimeError::PropertyNotFound(name.to_string())),
            },
            _ => Err(RuntimeError::TypeError(
                "property access applies to lists".to_string(),
            )),
        }
    }

    fn eval_invoke(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        env: &ScopeRef,
    ) -> Result<Value, RuntimeError> {
        // Method call: `$instance.method(args)` binds `$self`.
        if let Expr::Property { base, name } = callee {
            if let Value::List(list) = self.eval_expr(base, env, false)? {
                let method = list.borrow().get_keyed(name).cloned();
                match method {
                    Some(Value::Function(func)) => {
                        let args = self.eval_args(args, env)?;
                        return self.invoke_function(
                            &func,
                            args,
                            Some(Value::List(Rc::clone(&list))),
                        );
                    }
                    Some(other) => return Err(RuntimeError::NotAFunction(other.to_string())),
                    None => return Err(RuntimeError::PropertyNotFound(name.to_string())),
                }
            }
        }
        let callee_value = self.eval_expr(callee, env, false)?;
        match callee_value {
            Value::Function(func) => {
                let args = self.eval_args(args, env)?;
                self.invoke_function(&func, args, None)
            }
            other => Err(RuntimeError::NotAFunction(other.to_string())),
        }
    }

    // Arguments are value positions too; pass `@f` to hand a function over
    // uninvoked.
    fn eval_args(&mut self, args: &[Expr], env: &ScopeRef) -> Result<Vec<Value>, RuntimeError> {
        args.iter()
            .map(|arg| self.eval_expr(arg, env, true))
            .collect()
    }

    fn invoke_function(
        &mut self,
        func: &Rc<EnzoFunction>,
        args: Vec<Value>,
        receiver: Option<Value>,
    ) -> Result<Value, RuntimeError> {
        self.enter()?;
        let result = self.invoke_function_inner(func, args, receiver);
        self.depth -= 1;
        result
    }

    fn invoke_function_inner(
        &mut self,
        func: &Rc<EnzoFunction>,
        args: Vec<Value>,
        receiver: Option<Value>,
    ) -> Result<Value, RuntimeError> {
        if args.len() > func.params.len() {
            return Err(RuntimeError::TooManyArguments {
                expected: func.params.len(),
                got: args.len(),
            });
        }
        let scope = Scope::child(&func.closure);
        if let Some(receiver) = receiver {
            Scope::define(&scope, "$self", receiver)?;
        }
        let supplied = args.len();
        let mut args = args.into_iter();
        for param in &func.params {
            let value = match args.next() {
                Some(value) => value,
                None => match &param.default {
                    Some(default) => self.eval_expr(default, &scope, true)?,
                    None => {
                        return Err(RuntimeError::TooFewArguments {
                            expected: func.params.len(),
                            got: supplied,
                        });
                    }
                },
            };
            Scope::define(&scope, &param.name, value)?;
        }
        match self.eval_block(&func.body, &scope)? {
            Outcome::Value(value) => Ok(value),
            Outcome::Return(value) => Ok(value),
            // A function atom does not inherit an enclosing loop across the
            // call boundary.
            Outcome::EndLoop => Err(RuntimeError::SignalOutsideLoop("end-loop")),
            Outcome::RestartLoop => Err(RuntimeError::SignalOutsideLoop("restart-loop")),
        }
    }

    fn eval_binary(
        &mut self,
        op: BinOp,
        left: &Expr,
        right: &Expr,
        env: &ScopeRef,
    ) -> Result<Value, RuntimeError> {
        match op {
            BinOp::And => {
                let left = self.eval_expr(left, env, true)?;
                // `A and B` on blueprints is composition, not logic.
                if let Value::Blueprint(a) = &left {
                    if let Value::Blueprint(b) = self.eval_expr(right, env, true)? {
                        return Ok(Value::Blueprint(Rc::new(a.compose(&b))));
                    }
                    return Err(RuntimeError::TypeError(
                        "blueprint composition requires two blueprints".to_string(),
                    ));
                }
                if !left.truthy() {
                    return Ok(left);
                }
                self.eval_expr(right, env, true)
            }
            BinOp::Or => {
                let left = self.eval_expr(left, env, true)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.eval_expr(right, env, true)
            }
            BinOp::Is | BinOp::IsNot => {
                let left = self.eval_expr(left, env, true)?;
                let right = self.eval_expr(right, env, true)?;
                let equal = left.structural_eq(&right);
                Ok(boolean(if op == BinOp::Is { equal } else { !equal }))
            }
            BinOp::Contains => {
                let left = self.eval_expr(left, env, true)?;
                let right = self.eval_expr(right, env, true)?;
                match (&left, &right) {
                    (Value::List(list), needle) => Ok(boolean(
                        list.borrow()
                            .elements
                            .iter()
                            .any(|element| element.structural_eq(needle)),
                    )),
                    (Value::Text(haystack), Value::Text(needle)) => {
                        Ok(boolean(haystack.contains(needle.as_str())))
                    }
                    _ => Err(RuntimeError::TypeError(
                        "'contains' applies to lists and text".to_string(),
                    )),
                }
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                let left = self.number_operand(left, env)?;
                let right = self.number_operand(right, env)?;
                let value = match op {
                    BinOp::Add => left + right,
                    BinOp::Sub => left - right,
                    BinOp::Mul => left * right,
                    BinOp::Div => {
                        if right == 0.0 {
                            return Err(RuntimeError::TypeError("division by zero".to_string()));
                        }
                        left / right
                    }
                    _ => unreachable!(),
                };
                Ok(Value::Number(value))
            }
            BinOp::Less | BinOp::Greater | BinOp::LessEqual | BinOp::GreaterEqual => {
                let left = self.number_operand(left, env)?;
                let right = self.number_operand(right, env)?;
                let truth = match op {
                    BinOp::Less => left < right,
                    BinOp::Greater => left > right,
                    BinOp::LessEqual => left <= right,
                    BinOp::GreaterEqual => left >= right,
                    _ => unreachable!(),
                };
                Ok(boolean(truth))
            }
        }
    }

    fn number_operand(&mut self, expr: &Expr, env: &ScopeRef) -> Result<f64, RuntimeError> {
        match self.eval_expr(expr, env, true)? {
            Value::Number(n) => Ok(n),
            other => Err(RuntimeError::TypeError(format!(
                "expected a Number, got {}",
                other.type_tag()
            ))),
        }
    }

    fn eval_pipeline(
        &mut self,
        head: &Expr,
        stages: &[PipelineStage],
        env: &ScopeRef,
    ) -> Result<Value, RuntimeError> {
        let mut running = self.eval_expr(head, env, true)?;
        for stage in stages {
            let scope = Scope::child(env);
            Scope::define(&scope, "$this", running.clone())?;
            match stage {
                PipelineStage::Expr(expr) => {
                    running = self.eval_stage(expr, &scope, running)?;
                }
                PipelineStage::Conditional { condition, body } => {
                    if self.eval_expr(condition, &scope, true)?.truthy() {
                        running = match self.eval_block(body, &scope)? {
                            Outcome::Value(value) | Outcome::Return(value) => value,
                            Outcome::EndLoop => {
                                return Err(RuntimeError::SignalOutsideLoop("end-loop"))
                            }
                            Outcome::RestartLoop => {
                                return Err(RuntimeError::SignalOutsideLoop("restart-loop"))
                            }
                        };
                    }
                    // Falsy condition: $this passes through unchanged.
                }
            }
        }
        Ok(running)
    }

    /// A stage that names a function receives the running value as its
    /// argument; anything else is evaluated with `$this` in scope.
    fn eval_stage(
        &mut self,
        expr: &Expr,
        scope: &ScopeRef,
        running: Value,
    ) -> Result<Value, RuntimeError> {
        let callable = match expr {
            Expr::FunctionAtom(_) | Expr::VarInvoke(_) | Expr::FunctionRef(_) => {
                Some(self.eval_value_no_invoke(expr, scope)?)
            }
            _ => None,
        };
        match callable {
            Some(Value::Function(func)) => {
                let args = if func.params.is_empty() {
                    vec![]
                } else {
                    vec![running]
                };
                self.invoke_function(&func, args, None)
            }
            Some(other) => Ok(other),
            None => self.eval_expr(expr, scope, true),
        }
    }

    /// Evaluate a value position without auto-invoking function values, so
    /// bindings and arguments can carry functions around.
    fn eval_value_no_invoke(&mut self, expr: &Expr, env: &ScopeRef) -> Result<Value, RuntimeError> {
        match expr {
            Expr::FunctionAtom(_) | Expr::VarInvoke(_) => self.eval_expr(expr, env, false),
            _ => self.eval_expr(expr, env, true),
        }
    }

    fn eval_binding_value(
        &mut self,
        expr: &Expr,
        env: &ScopeRef,
        name: Option<&str>,
    ) -> Result<Value, RuntimeError> {
        if let Expr::BlueprintAtom(fields) = expr {
            return self.eval_blueprint_atom(fields, name.unwrap_or("anonymous"), env);
        }
        let value = self.eval_value_no_invoke(expr, env)?;
        // A composed blueprint takes the bound name.
        if let (Value::Blueprint(bp), Some(name)) = (&value, name) {
            if bp.name != name {
                return Ok(Value::Blueprint(Rc::new(Blueprint {
                    name: name.to_string(),
                    fields: bp.fields.clone(),
                })));
            }
        }
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Text interpolation

    /// Evaluate `<expr>` segments left to right and splice their string
    /// forms. Parse or evaluation failures surface as interpolation errors,
    /// distinct from ordinary parse/runtime errors.
    fn interpolate(&mut self, raw: &str, env: &ScopeRef) -> Result<String, RuntimeError> {
        if !raw.contains('<') {
            return Ok(raw.to_string());
        }
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(open) = rest.find('<') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let mut depth = 1usize;
            let mut close = None;
            for (i, chr) in after.char_indices() {
                match chr {
                    '<' => depth += 1,
                    '>' => {
                        depth -= 1;
                        if depth == 0 {
                            close = Some(i);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let close = close.ok_or_else(|| {
                RuntimeError::Interpolation("unterminated interpolation in text atom".to_string())
            })?;
            // A bracket may hold several `;`-separated statements; each
            // value's string form is spliced in order.
            let source = &after[..close];
            let program = parse_program(source)
                .map_err(|err| RuntimeError::Interpolation(err.message().to_string()))?;
            for stmt in &program.statements {
                let value = match self.eval_stmt(stmt, env, true) {
                    Ok(Outcome::Value(value)) | Ok(Outcome::Return(value)) => value,
                    Ok(_) => {
                        return Err(RuntimeError::Interpolation(
                            "loop signal in interpolation".to_string(),
                        ))
                    }
                    Err(err) => return Err(RuntimeError::Interpolation(err.to_string())),
                };
                out.push_str(&value.to_string());
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn boolean(truth: bool) -> Value {
    Value::Variant {
        group: "Boolean".to_string(),
        tag: if truth { "True" } else { "False" }.to_string(),
    }
}
