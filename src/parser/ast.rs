//! AST node definitions. Nodes are built once by the parser and never
//! mutated afterwards.

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    /// First definition of a name in the current scope. `value: None` is the
    /// empty binding `$x: ;`, which leaves the slot untyped.
    Binding {
        name: String,
        value: Option<Expr>,
    },
    /// `target <: value` or `value :> target`. The target may be a plain
    /// name, an index/property chain, or an unpack marker (`$l[]`).
    Rebind {
        target: Expr,
        value: Expr,
    },
    /// `param $x: default;` — only legal directly inside a function atom.
    Param(Param),
    Return(Option<Expr>),
    EndLoop,
    RestartLoop,
    If(IfStatement),
    Loop(LoopStatement),
    VariantGroupDef {
        group: String,
        tags: Vec<String>,
    },
    /// `$a, $b: $list[];`
    Destructure {
        targets: Vec<DestructureTarget>,
        source: Expr,
    },
    /// `$list[] :> $a, $b;`
    ReverseDestructure {
        source: Expr,
        targets: Vec<DestructureTarget>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DestructureTarget {
    pub name: String,
    pub rename: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStatement {
    /// Condition/block pairs in source order.
    pub branches: Vec<(Expr, Vec<Stmt>)>,
    pub else_block: Option<Vec<Stmt>>,
    /// `true` for `If`/`Else if` chains and `either/or`; `false` for the
    /// `or`-continued form where every truthy branch runs.
    pub exclusive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopKind {
    Bare,
    While(Expr),
    For {
        var: String,
        by_reference: bool,
        source: Expr,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopStatement {
    pub kind: LoopKind,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionAtom {
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub multiline: bool,
    pub code_line: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Is,
    IsNot,
    Contains,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListItem {
    Value(Expr),
    KeyValue { key: String, value: Expr },
    /// `<expr>` — splices the elements of a list into place.
    Spread(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStage {
    Expr(Expr),
    /// `then If cond, (transform)` — passes `$this` through unchanged when
    /// the condition is falsy.
    Conditional { condition: Expr, body: Vec<Stmt> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    /// Variable or function reference by name, `$x` or `name`.
    VarInvoke(String),
    /// `@name` — the function value itself, never auto-invoked.
    FunctionRef(String),
    ListAtom(Vec<ListItem>),
    /// `{ key: value, ... }` — record literal, last write wins per key.
    TableAtom(Vec<(String, Expr)>),
    /// `<[ field: default, ... ]>` — blueprint schema literal.
    BlueprintAtom(Vec<(String, Expr)>),
    /// `Name[ field: value, ... ]`
    BlueprintInstantiate {
        name: String,
        fields: Vec<(String, Expr)>,
    },
    FunctionAtom(Box<FunctionAtom>),
    Invoke {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `$l.1`, `$l.$i`
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// `$l.key`, `Group.Tag`, `$l."key"`
    Property {
        base: Box<Expr>,
        name: String,
    },
    /// `$l[]` — unpack marker in destructuring sources and targets.
    Unpack(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Pipeline {
        head: Box<Expr>,
        stages: Vec<PipelineStage>,
    },
}
