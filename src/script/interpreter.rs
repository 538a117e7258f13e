// ABOUTME: Async tree-walking interpreter that runs generated template programs
// ABOUTME: Resolves identifiers through scopes, the data context and builtins, with V8-style errors

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use indexmap::IndexMap;

use super::ast::*;
use super::builtins::{self, Builtin};
use super::error::{Result, ScriptError, STACK_EXCEEDED};
use super::value::{Function, Value};

struct Binding {
    value: Value,
    mutable: bool,
}

struct Frame {
    bindings: HashMap<String, Binding>,
    parent: Option<Scope>,
    /// Present on function frames only.
    this: Option<Value>,
}

/// Lexical environment shared by closures.
#[derive(Clone)]
pub struct Scope(Rc<RefCell<Frame>>);

enum Assigned {
    Done,
    Constant,
    Missing(Value),
}

impl Scope {
    pub fn function(parent: Option<&Scope>, this: Value) -> Self {
        Self(Rc::new(RefCell::new(Frame {
            bindings: HashMap::new(),
            parent: parent.cloned(),
            this: Some(this),
        })))
    }

    fn block(&self) -> Self {
        Self(Rc::new(RefCell::new(Frame {
            bindings: HashMap::new(),
            parent: Some(self.clone()),
            this: None,
        })))
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        let frame = self.0.borrow();
        if let Some(binding) = frame.bindings.get(name) {
            return Some(binding.value.clone());
        }
        frame.parent.as_ref()?.lookup(name)
    }

    fn declare(&self, name: &str, value: Value, mutable: bool) {
        self.0
            .borrow_mut()
            .bindings
            .insert(name.to_string(), Binding { value, mutable });
    }

    /// `var` semantics: hoisted to the nearest function frame, and a bare
    /// redeclaration keeps the existing value.
    fn declare_var(&self, name: &str, value: Option<Value>) {
        let mut frame = self.0.borrow_mut();
        if frame.this.is_none() {
            if let Some(parent) = frame.parent.clone() {
                drop(frame);
                return parent.declare_var(name, value);
            }
        }
        if let Some(binding) = frame.bindings.get_mut(name) {
            if let Some(value) = value {
                binding.value = value;
            }
            return;
        }
        frame.bindings.insert(
            name.to_string(),
            Binding {
                value: value.unwrap_or_default(),
                mutable: true,
            },
        );
    }

    fn assign(&self, name: &str, value: Value) -> Assigned {
        let mut frame = self.0.borrow_mut();
        if let Some(binding) = frame.bindings.get_mut(name) {
            if !binding.mutable {
                return Assigned::Constant;
            }
            binding.value = value;
            return Assigned::Done;
        }
        let parent = frame.parent.clone();
        drop(frame);
        match parent {
            Some(parent) => parent.assign(name, value),
            None => Assigned::Missing(value),
        }
    }

    fn this_value(&self) -> Value {
        let frame = self.0.borrow();
        match (&frame.this, &frame.parent) {
            (Some(this), _) => this.clone(),
            (None, Some(parent)) => parent.this_value(),
            (None, None) => Value::Undefined,
        }
    }
}

enum Completion {
    Normal,
    Break,
    Continue,
    Return(Value),
}

enum Place {
    Binding(String),
    Member(Value, String),
}

/// Nested statement, expression and call frames one run may hold. Every
/// frame is a poll level on the caller's stack, so the limit keeps runaway
/// recursion an ordinary error.
pub const MAX_EVALUATION_DEPTH: usize = 128;

/// Arrays are dense, so writes past this length are refused instead of
/// filling the gap.
pub const MAX_ARRAY_LENGTH: usize = 1 << 24;

/// Releases one evaluation frame when dropped.
struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// Runs one program with `data` bound as `this` and as the fallback
/// namespace for unqualified identifiers.
pub struct Interpreter {
    data: Value,
    globals: IndexMap<String, Value>,
    depth: Cell<usize>,
}

impl Interpreter {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            globals: builtins::globals(),
            depth: Cell::new(0),
        }
    }

    fn enter(&self, line: usize) -> Result<DepthGuard<'_>> {
        let depth = self.depth.get();
        if depth >= MAX_EVALUATION_DEPTH {
            return Err(ScriptError::runtime(STACK_EXCEEDED, line));
        }
        self.depth.set(depth + 1);
        Ok(DepthGuard(&self.depth))
    }

    /// Execute a program and return the value of its top-level `return`.
    ///
    /// The future only suspends when the program awaits an asynchronous host
    /// function.
    pub async fn run(&self, program: &Program) -> Result<Value> {
        let scope = Scope::function(None, self.data.clone());
        match self.exec_stmts(&program.body, &scope).await? {
            Completion::Return(value) => Ok(value),
            _ => Ok(Value::Undefined),
        }
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn hoist(&self, stmts: &[Stmt], scope: &Scope) {
        for stmt in stmts {
            if let StmtKind::Function(def) = &stmt.kind {
                if let Some(name) = &def.name {
                    scope.declare(name, make_closure(def, scope), true);
                }
            }
        }
    }

    fn exec_stmts<'a>(
        &'a self,
        stmts: &'a [Stmt],
        scope: &'a Scope,
    ) -> LocalBoxFuture<'a, Result<Completion>> {
        async move {
            self.hoist(stmts, scope);
            for stmt in stmts {
                let completion = self.exec_stmt(stmt, scope).await?;
                if !matches!(completion, Completion::Normal) {
                    return Ok(completion);
                }
            }
            Ok(Completion::Normal)
        }
        .boxed_local()
    }

    fn exec_stmt<'a>(
        &'a self,
        stmt: &'a Stmt,
        scope: &'a Scope,
    ) -> LocalBoxFuture<'a, Result<Completion>> {
        async move {
            let _frame = self.enter(stmt.line)?;
            match &stmt.kind {
                StmtKind::Expr(expr) => {
                    self.eval(expr, scope).await?;
                }
                StmtKind::Declare { kind, declarators } => {
                    for declarator in declarators {
                        let value = match &declarator.init {
                            Some(init) => Some(self.eval(init, scope).await?),
                            None => None,
                        };
                        match kind {
                            DeclKind::Var => scope.declare_var(&declarator.name, value),
                            DeclKind::Let | DeclKind::Const => scope.declare(
                                &declarator.name,
                                value.unwrap_or_default(),
                                *kind == DeclKind::Let,
                            ),
                        }
                    }
                }
                StmtKind::Block(body) => {
                    let inner = scope.block();
                    return self.exec_stmts(body, &inner).await;
                }
                StmtKind::If {
                    test,
                    consequent,
                    alternate,
                } => {
                    if self.eval(test, scope).await?.is_truthy() {
                        return self.exec_stmt(consequent, scope).await;
                    }
                    if let Some(alternate) = alternate {
                        return self.exec_stmt(alternate, scope).await;
                    }
                }
                StmtKind::For {
                    init,
                    test,
                    update,
                    body,
                } => {
                    let loop_scope = scope.block();
                    if let Some(init) = init {
                        self.exec_stmt(init, &loop_scope).await?;
                    }
                    loop {
                        if let Some(test) = test {
                            if !self.eval(test, &loop_scope).await?.is_truthy() {
                                break;
                            }
                        }
                        let iteration = loop_scope.block();
                        match self.exec_stmt(body, &iteration).await? {
                            Completion::Break => break,
                            Completion::Return(value) => return Ok(Completion::Return(value)),
                            Completion::Normal | Completion::Continue => {}
                        }
                        if let Some(update) = update {
                            self.eval(update, &loop_scope).await?;
                        }
                    }
                }
                StmtKind::ForOf {
                    kind,
                    name,
                    iterable,
                    body,
                } => {
                    let items = match self.eval(iterable, scope).await? {
                        Value::Array(items) => items,
                        Value::Str(s) => Rc::new(RefCell::new(
                            s.chars().map(|c| Value::Str(c.to_string())).collect(),
                        )),
                        _ => {
                            return Err(ScriptError::runtime(
                                format!("{} is not iterable", iterable.describe()),
                                stmt.line,
                            ))
                        }
                    };
                    let mut index = 0;
                    loop {
                        let Some(item) = items.borrow().get(index).cloned() else {
                            break;
                        };
                        index += 1;
                        let iteration = scope.block();
                        self.bind_loop_variable(*kind, name, item, &iteration, stmt.line)?;
                        match self.exec_stmt(body, &iteration).await? {
                            Completion::Break => break,
                            Completion::Return(value) => return Ok(Completion::Return(value)),
                            Completion::Normal | Completion::Continue => {}
                        }
                    }
                }
                StmtKind::ForIn {
                    kind,
                    name,
                    object,
                    body,
                } => {
                    let source = self.eval(object, scope).await?;
                    for (key, _) in builtins::own_entries(&source) {
                        let iteration = scope.block();
                        self.bind_loop_variable(*kind, name, Value::Str(key), &iteration, stmt.line)?;
                        match self.exec_stmt(body, &iteration).await? {
                            Completion::Break => break,
                            Completion::Return(value) => return Ok(Completion::Return(value)),
                            Completion::Normal | Completion::Continue => {}
                        }
                    }
                }
                StmtKind::While { test, body } => {
                    while self.eval(test, scope).await?.is_truthy() {
                        match self.exec_stmt(body, &scope.block()).await? {
                            Completion::Break => break,
                            Completion::Return(value) => return Ok(Completion::Return(value)),
                            Completion::Normal | Completion::Continue => {}
                        }
                    }
                }
                StmtKind::DoWhile { body, test } => loop {
                    match self.exec_stmt(body, &scope.block()).await? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                    if !self.eval(test, scope).await?.is_truthy() {
                        break;
                    }
                },
                StmtKind::Switch {
                    discriminant,
                    cases,
                } => {
                    let value = self.eval(discriminant, scope).await?;
                    let mut start = None;
                    for (index, case) in cases.iter().enumerate() {
                        if let Some(test) = &case.test {
                            if self.eval(test, scope).await?.strict_equals(&value) {
                                start = Some(index);
                                break;
                            }
                        }
                    }
                    let start = start.or_else(|| cases.iter().position(|case| case.test.is_none()));
                    if let Some(start) = start {
                        let inner = scope.block();
                        for case in &cases[start..] {
                            match self.exec_stmts(&case.body, &inner).await? {
                                Completion::Normal => {}
                                Completion::Break => break,
                                other => return Ok(other),
                            }
                        }
                    }
                }
                StmtKind::Break => return Ok(Completion::Break),
                StmtKind::Continue => return Ok(Completion::Continue),
                StmtKind::Return(value) => {
                    let value = match value {
                        Some(expr) => self.eval(expr, scope).await?,
                        None => Value::Undefined,
                    };
                    return Ok(Completion::Return(value));
                }
                StmtKind::Throw(expr) => {
                    let value = self.eval(expr, scope).await?;
                    return Err(ScriptError::runtime(thrown_message(&value), stmt.line));
                }
                StmtKind::Function(_) | StmtKind::Empty => {}
            }
            Ok(Completion::Normal)
        }
        .boxed_local()
    }

    fn bind_loop_variable(
        &self,
        kind: Option<DeclKind>,
        name: &str,
        value: Value,
        scope: &Scope,
        line: usize,
    ) -> Result<()> {
        match kind {
            Some(DeclKind::Var) => scope.declare_var(name, Some(value)),
            Some(kind) => scope.declare(name, value, kind == DeclKind::Let),
            None => self.assign_identifier(name, value, scope, line)?,
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn eval<'a>(&'a self, expr: &'a Expr, scope: &'a Scope) -> LocalBoxFuture<'a, Result<Value>> {
        async move {
            let _frame = self.enter(expr.line)?;
            let value = match &expr.kind {
                ExprKind::Number(n) => Value::Number(*n),
                ExprKind::Str(s) => Value::Str(s.clone()),
                ExprKind::Bool(b) => Value::Bool(*b),
                ExprKind::Null => Value::Null,
                ExprKind::Undefined => Value::Undefined,
                ExprKind::This => scope.this_value(),
                ExprKind::Ident(name) => self.lookup(name, scope, expr.line)?,
                ExprKind::Array(elements) => {
                    let mut items = Vec::with_capacity(elements.len());
                    for element in elements {
                        items.push(self.eval(element, scope).await?);
                    }
                    Value::array(items)
                }
                ExprKind::Object(properties) => {
                    let mut entries = IndexMap::with_capacity(properties.len());
                    for (key, value) in properties {
                        entries.insert(key.clone(), self.eval(value, scope).await?);
                    }
                    Value::object(entries)
                }
                ExprKind::Member { .. } | ExprKind::Call { .. } => self
                    .eval_chain(expr, scope, false)
                    .await?
                    .map(|(_, value)| value)
                    .unwrap_or_default(),
                ExprKind::Unary { op, operand } => {
                    let value = match (&operand.kind, op) {
                        // `typeof missing` is not a reference error.
                        (ExprKind::Ident(name), UnaryOp::TypeOf) => {
                            self.lookup(name, scope, expr.line).unwrap_or_default()
                        }
                        _ => self.eval(operand, scope).await?,
                    };
                    match op {
                        UnaryOp::Not => Value::Bool(!value.is_truthy()),
                        UnaryOp::Neg => Value::Number(-value.to_number()),
                        UnaryOp::Plus => Value::Number(value.to_number()),
                        UnaryOp::TypeOf => Value::string(value.type_of()),
                    }
                }
                ExprKind::Update {
                    increment,
                    prefix,
                    target,
                } => {
                    let place = self.place(target, scope).await?;
                    let old = self.read_place(&place, scope, expr.line)?.to_number();
                    let new = if *increment { old + 1.0 } else { old - 1.0 };
                    self.write_place(place, Value::Number(new), scope, expr.line)?;
                    Value::Number(if *prefix { new } else { old })
                }
                ExprKind::Binary { op, left, right } => {
                    let left = self.eval(left, scope).await?;
                    let right = self.eval(right, scope).await?;
                    apply_binary(*op, &left, &right).map_err(|e| e.at_line(expr.line))?
                }
                ExprKind::Logical { op, left, right } => {
                    let left = self.eval(left, scope).await?;
                    let short_circuit = match op {
                        LogicalOp::And => !left.is_truthy(),
                        LogicalOp::Or => left.is_truthy(),
                        LogicalOp::Nullish => !left.is_nullish(),
                    };
                    if short_circuit {
                        left
                    } else {
                        self.eval(right, scope).await?
                    }
                }
                ExprKind::Conditional {
                    test,
                    consequent,
                    alternate,
                } => {
                    if self.eval(test, scope).await?.is_truthy() {
                        self.eval(consequent, scope).await?
                    } else {
                        self.eval(alternate, scope).await?
                    }
                }
                ExprKind::Assign { op, target, value } => {
                    let place = self.place(target, scope).await?;
                    let result = match (op, op.binary()) {
                        (AssignOp::Nullish, _) => {
                            let current = self.read_place(&place, scope, expr.line)?;
                            if !current.is_nullish() {
                                return Ok(current);
                            }
                            self.eval(value, scope).await?
                        }
                        (_, Some(binary)) => {
                            let current = self.read_place(&place, scope, expr.line)?;
                            let operand = self.eval(value, scope).await?;
                            apply_binary(binary, &current, &operand)
                                .map_err(|e| e.at_line(expr.line))?
                        }
                        _ => self.eval(value, scope).await?,
                    };
                    self.write_place(place, result.clone(), scope, expr.line)?;
                    result
                }
                ExprKind::Function(def) => make_closure(def, scope),
                ExprKind::Await(operand) => match operand.kind {
                    ExprKind::Call { .. } => self
                        .eval_chain(operand, scope, true)
                        .await?
                        .map(|(_, value)| value)
                        .unwrap_or_default(),
                    _ => self.eval(operand, scope).await?,
                },
            };
            Ok(value)
        }
        .boxed_local()
    }

    /// Evaluate a member/call chain, returning the receiver alongside the
    /// value so method calls get their `this`. `None` means an optional link
    /// short-circuited the rest of the chain.
    fn eval_chain<'a>(
        &'a self,
        expr: &'a Expr,
        scope: &'a Scope,
        awaited: bool,
    ) -> LocalBoxFuture<'a, Result<Option<(Value, Value)>>> {
        async move {
            match &expr.kind {
                ExprKind::Member {
                    object,
                    property,
                    optional,
                } => {
                    let Some((_, target)) = self.eval_chain(object, scope, false).await? else {
                        return Ok(None);
                    };
                    if *optional && target.is_nullish() {
                        return Ok(None);
                    }
                    let key = self.property_key(property, scope).await?;
                    let value = self.get_member(&target, &key, expr.line)?;
                    Ok(Some((target, value)))
                }
                ExprKind::Call {
                    callee,
                    args,
                    optional,
                } => {
                    let Some((this, callee_value)) = self.eval_chain(callee, scope, false).await?
                    else {
                        return Ok(None);
                    };
                    if *optional && callee_value.is_nullish() {
                        return Ok(None);
                    }
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval(arg, scope).await?);
                    }
                    let Value::Function(function) = callee_value else {
                        return Err(ScriptError::runtime(
                            format!("{} is not a function", callee.describe()),
                            expr.line,
                        ));
                    };
                    let result = self
                        .call_function(function, this, values, expr.line, awaited)
                        .await?;
                    Ok(Some((Value::Undefined, result)))
                }
                _ => Ok(Some((Value::Undefined, self.eval(expr, scope).await?))),
            }
        }
        .boxed_local()
    }

    async fn property_key(&self, property: &Property, scope: &Scope) -> Result<String> {
        match property {
            Property::Named(name) => Ok(name.clone()),
            Property::Computed(expr) => Ok(self.eval(expr, scope).await?.to_string()),
        }
    }

    async fn place(&self, target: &Expr, scope: &Scope) -> Result<Place> {
        match &target.kind {
            ExprKind::Ident(name) => Ok(Place::Binding(name.clone())),
            ExprKind::Member {
                object, property, ..
            } => {
                let object = self.eval(object, scope).await?;
                let key = self.property_key(property, scope).await?;
                Ok(Place::Member(object, key))
            }
            _ => Err(ScriptError::syntax(
                "Invalid left-hand side in assignment",
                target.line,
            )),
        }
    }

    fn read_place(&self, place: &Place, scope: &Scope, line: usize) -> Result<Value> {
        match place {
            Place::Binding(name) => self.lookup(name, scope, line),
            Place::Member(object, key) => self.get_member(object, key, line),
        }
    }

    fn write_place(&self, place: Place, value: Value, scope: &Scope, line: usize) -> Result<()> {
        match place {
            Place::Binding(name) => self.assign_identifier(&name, value, scope, line),
            Place::Member(object, key) => set_member(&object, &key, value, line),
        }
    }

    fn lookup(&self, name: &str, scope: &Scope, line: usize) -> Result<Value> {
        if let Some(value) = scope.lookup(name) {
            return Ok(value);
        }
        if let Value::Object(map) = &self.data {
            if let Some(value) = map.borrow().get(name) {
                return Ok(value.clone());
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        Err(ScriptError::runtime(format!("{} is not defined", name), line))
    }

    fn assign_identifier(&self, name: &str, value: Value, scope: &Scope, line: usize) -> Result<()> {
        match scope.assign(name, value) {
            Assigned::Done => Ok(()),
            Assigned::Constant => Err(ScriptError::runtime(
                "Assignment to constant variable.",
                line,
            )),
            // Undeclared names land on the data context, which is where the
            // next lookup of the same name will find them.
            Assigned::Missing(value) => {
                if let Value::Object(map) = &self.data {
                    map.borrow_mut().insert(name.to_string(), value);
                }
                Ok(())
            }
        }
    }

    fn get_member(&self, target: &Value, key: &str, line: usize) -> Result<Value> {
        let value = match target {
            Value::Undefined | Value::Null => {
                return Err(ScriptError::runtime(
                    format!("Cannot read property '{}' of {}", key, target),
                    line,
                ))
            }
            Value::Object(map) => map.borrow().get(key).cloned().unwrap_or_default(),
            Value::Array(items) if key == "length" => Value::Number(items.borrow().len() as f64),
            Value::Array(items) => match array_index(key) {
                Some(index) => items.borrow().get(index).cloned().unwrap_or_default(),
                None => method_value(target, key),
            },
            Value::Str(s) if key == "length" => Value::Number(s.chars().count() as f64),
            Value::Str(s) => match array_index(key) {
                Some(index) => s
                    .chars()
                    .nth(index)
                    .map(|c| Value::Str(c.to_string()))
                    .unwrap_or_default(),
                None => method_value(target, key),
            },
            Value::Function(function) if key == "name" => Value::string(function.name()),
            Value::Function(function) => match function.as_ref() {
                Function::Builtin(builtin) => builtins::static_member(*builtin, key)
                    .unwrap_or_else(|| method_value(target, key)),
                _ => method_value(target, key),
            },
            _ => method_value(target, key),
        };
        Ok(value)
    }

    fn call_function<'a>(
        &'a self,
        function: Rc<Function>,
        this: Value,
        args: Vec<Value>,
        line: usize,
        awaited: bool,
    ) -> LocalBoxFuture<'a, Result<Value>> {
        async move {
            match function.as_ref() {
                Function::Script {
                    def,
                    scope,
                    this: captured,
                } => {
                    let _frame = self.enter(line)?;
                    let frame_this = if def.is_arrow {
                        captured.clone().unwrap_or_default()
                    } else {
                        this
                    };
                    let local = Scope::function(Some(scope), frame_this);
                    for (index, param) in def.params.iter().enumerate() {
                        local.declare(param, args.get(index).cloned().unwrap_or_default(), true);
                    }
                    match &def.body {
                        FunctionBody::Block(body) => match self.exec_stmts(body, &local).await? {
                            Completion::Return(value) => Ok(value),
                            _ => Ok(Value::Undefined),
                        },
                        FunctionBody::Expr(expr) => self.eval(expr, &local).await,
                    }
                }
                Function::Native { call, .. } => call(this, args).map_err(|e| e.at_line(line)),
                Function::AsyncNative { name, call } => {
                    if !awaited {
                        return Err(ScriptError::runtime(
                            format!("{} returns a promise and must be awaited", name),
                            line,
                        ));
                    }
                    call(this, args).await.map_err(|e| e.at_line(line))
                }
                Function::Builtin(builtin) if builtin.takes_callback() => {
                    self.call_with_callback(*builtin, this, args, line).await
                }
                Function::Builtin(builtin) => {
                    builtins::call(*builtin, &this, &args).map_err(|e| e.at_line(line))
                }
            }
        }
        .boxed_local()
    }

    /// Array methods that invoke a script callback per element.
    async fn call_with_callback(
        &self,
        builtin: Builtin,
        this: Value,
        args: Vec<Value>,
        line: usize,
    ) -> Result<Value> {
        let Value::Array(items) = &this else {
            return Err(ScriptError::runtime(
                format!("{} is not a function", builtin.name()),
                line,
            ));
        };
        let callback = match args.first() {
            Some(Value::Function(function)) => Rc::clone(function),
            other => {
                return Err(ScriptError::runtime(
                    format!("{} is not a function", other.cloned().unwrap_or_default()),
                    line,
                ))
            }
        };
        let snapshot: Vec<Value> = items.borrow().clone();

        if builtin == Builtin::Reduce {
            let mut entries = snapshot.into_iter().enumerate();
            let mut accumulator = match args.get(1) {
                Some(initial) => initial.clone(),
                None => match entries.next() {
                    Some((_, first)) => first,
                    None => {
                        return Err(ScriptError::runtime(
                            "Reduce of empty array with no initial value",
                            line,
                        ))
                    }
                },
            };
            for (index, item) in entries {
                accumulator = self
                    .call_function(
                        Rc::clone(&callback),
                        Value::Undefined,
                        vec![accumulator, item, Value::Number(index as f64), this.clone()],
                        line,
                        false,
                    )
                    .await?;
            }
            return Ok(accumulator);
        }

        let mut mapped = Vec::new();
        for (index, item) in snapshot.into_iter().enumerate() {
            let result = self
                .call_function(
                    Rc::clone(&callback),
                    Value::Undefined,
                    vec![item.clone(), Value::Number(index as f64), this.clone()],
                    line,
                    false,
                )
                .await?;
            match builtin {
                Builtin::Map => mapped.push(result),
                Builtin::Filter if result.is_truthy() => mapped.push(item),
                Builtin::Find if result.is_truthy() => return Ok(item),
                Builtin::FindIndex if result.is_truthy() => return Ok(Value::Number(index as f64)),
                Builtin::Any if result.is_truthy() => return Ok(Value::Bool(true)),
                Builtin::Every if !result.is_truthy() => return Ok(Value::Bool(false)),
                _ => {}
            }
        }

        Ok(match builtin {
            Builtin::Map | Builtin::Filter => Value::array(mapped),
            Builtin::FindIndex => Value::Number(-1.0),
            Builtin::Any => Value::Bool(false),
            Builtin::Every => Value::Bool(true),
            _ => Value::Undefined,
        })
    }
}

fn make_closure(def: &Rc<FunctionDef>, scope: &Scope) -> Value {
    let this = def.is_arrow.then(|| scope.this_value());
    Value::Function(Rc::new(Function::Script {
        def: Rc::clone(def),
        scope: scope.clone(),
        this,
    }))
}

fn method_value(target: &Value, key: &str) -> Value {
    builtins::method(target, key)
        .map(Value::builtin)
        .unwrap_or_default()
}

fn array_index(key: &str) -> Option<usize> {
    key.parse::<usize>()
        .ok()
        .filter(|index| index.to_string() == key)
}

fn set_member(target: &Value, key: &str, value: Value, line: usize) -> Result<()> {
    match target {
        Value::Undefined | Value::Null => {
            return Err(ScriptError::runtime(
                format!("Cannot set property '{}' of {}", key, target),
                line,
            ))
        }
        Value::Object(map) => {
            map.borrow_mut().insert(key.to_string(), value);
        }
        Value::Array(items) if key == "length" => {
            let len = value.to_number();
            if len.is_nan() || len < 0.0 || len.fract() != 0.0 || len > MAX_ARRAY_LENGTH as f64 {
                return Err(ScriptError::runtime("Invalid array length", line));
            }
            items.borrow_mut().resize(len as usize, Value::Undefined);
        }
        Value::Array(items) => {
            if let Some(index) = array_index(key) {
                let mut items = items.borrow_mut();
                if index >= items.len() {
                    if index >= MAX_ARRAY_LENGTH {
                        return Err(ScriptError::runtime("Invalid array length", line));
                    }
                    items.resize(index + 1, Value::Undefined);
                }
                items[index] = value;
            }
        }
        // Writes to primitives are silently dropped.
        _ => {}
    }
    Ok(())
}

fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) | Value::Function(_) => Value::Str(value.to_string()),
        other => other.clone(),
    }
}

pub fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    let value = match op {
        BinaryOp::Add => {
            let (left, right) = (to_primitive(left), to_primitive(right));
            if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
                let (left, right) = (left.to_string(), right.to_string());
                builtins::check_string_length(left.len() + right.len())?;
                Value::Str(left + &right)
            } else {
                Value::Number(left.to_number() + right.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::LtEq | BinaryOp::GtEq => {
            Value::Bool(compare(op, &to_primitive(left), &to_primitive(right)))
        }
    };
    Ok(value)
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::LtEq => ordering.is_le(),
        _ => ordering.is_ge(),
    }
}

/// Message carried by a `throw`: an object's `message` field, otherwise
/// the value's string form.
fn thrown_message(value: &Value) -> String {
    if let Value::Object(map) = value {
        if let Some(message) = map.borrow().get("message") {
            return message.to_string();
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse_program;
    use futures::FutureExt;
    use serde_json::json;

    fn run_with(source: &str, data: Value) -> Result<Value> {
        let program = parse_program(source, true)?;
        Interpreter::new(data)
            .run(&program)
            .now_or_never()
            .expect("program should not suspend")
    }

    fn run(source: &str, data: serde_json::Value) -> Result<Value> {
        run_with(source, Value::from_json(&data))
    }

    fn render(source: &str) -> String {
        run(source, json!({})).unwrap().to_string()
    }

    #[test]
    fn test_reads_data_context_through_this_and_bare_names() {
        let data = json!({"user": {"name": "Ada"}, "count": 2});
        let result = run("return this.user.name + ' ' + count;", data).unwrap();
        assert_eq!(result.to_string(), "Ada 2");
    }

    #[test]
    fn test_missing_property_reports_v8_message_and_line() {
        let error = run("let a = 1;\nreturn this.user.name;", json!({})).unwrap_err();
        assert_eq!(error.message(), "Cannot read property 'name' of undefined");
        assert_eq!(error.line(), Some(2));
    }

    #[test]
    fn test_reference_and_const_errors() {
        let error = run("\n\nmissing + 1", json!({})).unwrap_err();
        assert_eq!(error.message(), "missing is not defined");
        assert_eq!(error.line(), Some(3));

        let error = run("const a = 1; a = 2;", json!({})).unwrap_err();
        assert_eq!(error.message(), "Assignment to constant variable.");

        let error = run("this.nope();", json!({})).unwrap_err();
        assert_eq!(error.message(), "this.nope is not a function");
    }

    #[test]
    fn test_control_flow() {
        let source = r#"
            let out = [];
            for (let i = 0; i < 5; i++) {
                if (i == 1) continue;
                if (i === 4) break;
                out.push(i);
            }
            let n = 0;
            while (n < 3) { n += 1; }
            do { n--; } while (n > 10);
            switch (n) {
                case 1: out.push('one');
                case 2: out.push('two'); break;
                default: out.push('other');
            }
            return out.join(',');
        "#;
        assert_eq!(render(source), "0,2,3,two");
    }

    #[test]
    fn test_loops_over_data() {
        let data = json!({"projects": ["a", "b"], "meta": {"x": 1, "y": 2}});
        let source = r#"
            let out = '';
            for (const p of this.projects) { out += p.toUpperCase(); }
            for (let key in this.meta) { out += key; }
            return out;
        "#;
        assert_eq!(run(source, data).unwrap().to_string(), "ABxy");

        let error = run("for (const p of this.projects) {}", json!({})).unwrap_err();
        assert_eq!(error.message(), "this.projects is not iterable");
    }

    #[test]
    fn test_closures_and_callbacks() {
        let source = r#"
            function twice(x) { return x * 2; }
            const items = [1, 2, 3, 4];
            const doubled = items.map(twice).filter(n => n > 4);
            const total = items.reduce((acc, n) => acc + n, 0);
            let counter = 0;
            const bump = () => { counter++; };
            bump(); bump();
            return [doubled.join('|'), total, counter, items.some(n => n > 3), items.find(n => n > 9)].join(';');
        "#;
        assert_eq!(render(source), "6|8;10;2;true;");
    }

    #[test]
    fn test_methods_receive_this() {
        let source = r#"
            const greeter = { name: 'vemtl', hello() { return 'hi ' + this.name; } };
            return greeter.hello();
        "#;
        assert_eq!(render(source), "hi vemtl");
    }

    #[test]
    fn test_optional_chaining_and_nullish() {
        let data = json!({"a": null});
        let source = "return [this.a?.b.c, this.missing?.(), this.a ?? 'dflt', typeof nothing].join(',');";
        assert_eq!(run(source, data).unwrap().to_string(), ",,dflt,undefined");
    }

    #[test]
    fn test_throw_uses_message_field() {
        let error = run("throw { message: 'custom failure' };", json!({})).unwrap_err();
        assert_eq!(error.message(), "custom failure");
        assert_eq!(error.line(), Some(1));
    }

    #[test]
    fn test_arithmetic_and_coercion() {
        assert_eq!(render("return 1 + '2';"), "12");
        assert_eq!(render("return '3' * '4';"), "12");
        assert_eq!(render("return 7 % 3 + 0.5;"), "1.5");
        assert_eq!(render("return [1, 2] + '';"), "1,2");
        assert_eq!(render("return 'b' > 'a' && 2 >= 2;"), "true");
        assert_eq!(render("return null == undefined;"), "true");
    }

    #[test]
    fn test_native_errors_take_call_line() {
        let mut entries = IndexMap::new();
        entries.insert(
            "fail".to_string(),
            Value::function("fail", |_| Err(ScriptError::thrown("host failure"))),
        );
        let error = run_with("let a = 1;\n\nfail();", Value::object(entries)).unwrap_err();
        assert_eq!(error.message(), "host failure");
        assert_eq!(error.line(), Some(3));
    }

    #[test]
    fn test_async_functions_require_await() {
        let mut entries = IndexMap::new();
        entries.insert(
            "load".to_string(),
            Value::async_function("load", |args: Vec<Value>| async move {
                Ok(Value::string(format!("loaded {}", args[0])))
            }),
        );
        let data = Value::object(entries);

        let result = run_with("return await load('x');", data.clone()).unwrap();
        assert_eq!(result.to_string(), "loaded x");

        let error = run_with("return load('x');", data).unwrap_err();
        assert_eq!(error.message(), "load returns a promise and must be awaited");
    }

    #[test]
    fn test_runaway_recursion_is_a_runtime_error() {
        let error = run("function f(n) {\n  return f(n + 1);\n}\nreturn f(0);", json!({})).unwrap_err();
        assert!(!error.is_syntax());
        assert_eq!(error.message(), STACK_EXCEEDED);
        assert_eq!(error.line(), Some(2));

        let source = "function fact(n) { return n <= 1 ? 1 : n * fact(n - 1); }\nreturn fact(5);";
        assert_eq!(render(source), "120");
    }

    #[test]
    fn test_depth_recovers_after_overflow() {
        let data = Value::from_json(&json!({}));
        let interpreter = Interpreter::new(data);
        let runaway = parse_program("let g = () => g();\ng();", true).unwrap();
        let error = interpreter.run(&runaway).now_or_never().unwrap().unwrap_err();
        assert_eq!(error.message(), STACK_EXCEEDED);

        let program = parse_program("return [1, 2].map(x => x * 2).join('-');", true).unwrap();
        let result = interpreter.run(&program).now_or_never().unwrap().unwrap();
        assert_eq!(result.to_string(), "2-4");
    }

    #[test]
    fn test_array_and_string_growth_limits() {
        let error = run("let a = [];\na[4000000000] = 1;", json!({})).unwrap_err();
        assert_eq!(error.message(), "Invalid array length");
        assert_eq!(error.line(), Some(2));

        let error = run("let a = [];\na.length = -1;", json!({})).unwrap_err();
        assert_eq!(error.message(), "Invalid array length");

        assert_eq!(render("let a = [];\na[3] = 1;\nreturn a.length;"), "4");

        let error = run("let s = 'ab'.repeat(1e15);", json!({})).unwrap_err();
        assert_eq!(error.message(), "Invalid string length");
    }

    #[test]
    fn test_number_statics_and_method_arguments() {
        assert_eq!(render("return Number.MAX_SAFE_INTEGER;"), "9007199254740991");
        assert_eq!(render("return Number.isInteger(4) && !Number.isNaN('x');"), "true");
        assert_eq!(render("return (255).toString(16);"), "ff");
        assert_eq!(render("return 'a-b-c'.split('-', 2).join('|');"), "a|b");
        assert_eq!(render("return 'abc'.replace('b', '$&$&');"), "abbc");
        assert_eq!(render("return parseInt('0x1f');"), "31");
    }

    #[tokio::test]
    async fn test_suspends_across_host_futures() {
        let mut entries = IndexMap::new();
        entries.insert(
            "later".to_string(),
            Value::async_function("later", |_args: Vec<Value>| async {
                tokio::task::yield_now().await;
                Ok(Value::from("done"))
            }),
        );
        let program = parse_program("let v = await this.later();\nreturn v + '!';", true).unwrap();
        let interpreter = Interpreter::new(Value::object(entries));
        let result = interpreter.run(&program).await.unwrap();
        assert_eq!(result.to_string(), "done!");
    }
}
