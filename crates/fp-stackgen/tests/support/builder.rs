//! Terse constructors for typed trees.

use fp_core::span::Span;
use fp_core::thir::{
    BinaryOp, FunctionId, FunctionKind, GeneralKind, ThirBlock, ThirCall, ThirCallee, ThirExpr,
    ThirExprKind, ThirExternal, ThirField, ThirFunction, ThirIfBranch, ThirLit, ThirLocal,
    ThirParam, ThirProgram, ThirStmt, ThirStmtKind, ThirType, Ty, TypeId, TypeKind, TypeRef,
    UnaryOp, Visibility,
};

#[derive(Default)]
pub struct ProgramBuilder {
    program: ThirProgram,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> ThirProgram {
        self.program
    }

    pub fn external(&mut self, name: &str, params: Vec<Ty>, ret: Ty) {
        self.program.externals.push(ThirExternal {
            name: name.to_string(),
            params,
            ret,
        });
    }

    pub fn statement(&mut self, stmt: ThirStmt) {
        self.program.statements.push(stmt);
    }

    pub fn define_type(&mut self, name: &str, kind: TypeKind, fields: Vec<ThirField>) -> TypeId {
        self.define_generic_type(name, kind, Vec::new(), fields)
    }

    pub fn define_generic_type(
        &mut self,
        name: &str,
        kind: TypeKind,
        type_params: Vec<&str>,
        fields: Vec<ThirField>,
    ) -> TypeId {
        let id = TypeId(self.program.types.len() as u32);
        self.program.types.push(ThirType {
            id,
            name: name.to_string(),
            kind,
            type_params: type_params.into_iter().map(str::to_string).collect(),
            fields,
            file: 0,
            span: Span::default(),
        });
        id
    }

    pub fn function(
        &mut self,
        name: &str,
        params: Vec<ThirParam>,
        ret: Ty,
        body: Vec<ThirStmt>,
    ) -> FunctionId {
        let id = FunctionId(self.program.functions.len() as u32);
        self.program.functions.push(ThirFunction {
            id,
            name: name.to_string(),
            kind: FunctionKind::Plain,
            type_params: Vec::new(),
            this_ty: None,
            params,
            ret,
            body: ThirBlock::new(body),
            visibility: Visibility::Public,
            is_entry: false,
            is_macro: false,
            file: 0,
            span: Span::default(),
        });
        id
    }

    /// Void entry function `main`.
    pub fn entry(&mut self, body: Vec<ThirStmt>) -> FunctionId {
        let id = self.function("main", Vec::new(), Ty::Void, body);
        self.function_mut(id).is_entry = true;
        id
    }

    pub fn general(
        &mut self,
        owner: &Ty,
        kind: GeneralKind,
        params: Vec<ThirParam>,
        ret: Ty,
        body: Vec<ThirStmt>,
    ) -> FunctionId {
        let owner_id = owner.type_ref().map(|r| r.id).unwrap_or(TypeId(0));
        let id = self.function(&format!("{:?}", kind).to_lowercase(), params, ret, body);
        let function = self.function_mut(id);
        function.kind = FunctionKind::General {
            kind,
            owner: owner_id,
        };
        function.this_ty = Some(owner.clone());
        id
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut ThirFunction {
        &mut self.program.functions[id.0 as usize]
    }
}

pub fn param(name: &str, ty: Ty) -> ThirParam {
    ThirParam::new(name, ty)
}

/// Parameter whose heap-backed argument the caller releases after the call.
pub fn consumed(name: &str, ty: Ty) -> ThirParam {
    ThirParam {
        consumes: true,
        ..ThirParam::new(name, ty)
    }
}

/// Class `Tracker { id: int }` built from `new Tracker(id)`, whose destructor
/// prints its id. Returns the class type and the destructor.
pub fn tracker_class(builder: &mut ProgramBuilder) -> (Ty, FunctionId) {
    let tracker = builder.define_type("Tracker", TypeKind::Class, vec![field("id", Ty::Int, None)]);
    let tracker_ty = class_ty(tracker);
    let this = || ident("this", tracker_ty.clone());
    builder.general(
        &tracker_ty,
        GeneralKind::Constructor,
        vec![param("id", Ty::Int)],
        Ty::Void,
        vec![assign(get(this(), "id", Ty::Int), ident("id", Ty::Int))],
    );
    let destructor = builder.general(
        &tracker_ty,
        GeneralKind::Destructor,
        Vec::new(),
        Ty::Void,
        vec![print(get(this(), "id", Ty::Int))],
    );
    (tracker_ty, destructor)
}

pub fn field(name: &str, ty: Ty, default: Option<ThirExpr>) -> ThirField {
    ThirField {
        name: name.to_string(),
        ty,
        default,
    }
}

pub fn struct_ty(id: TypeId) -> Ty {
    Ty::Struct(TypeRef::plain(id))
}

pub fn class_ty(id: TypeId) -> Ty {
    Ty::Class(TypeRef::plain(id))
}

fn expr(kind: ThirExprKind, ty: Ty) -> ThirExpr {
    ThirExpr::new(kind, ty, Span::default())
}

pub fn int(value: i64) -> ThirExpr {
    expr(ThirExprKind::Literal(ThirLit::Int(value)), Ty::Int)
}

pub fn float(value: f64) -> ThirExpr {
    expr(ThirExprKind::Literal(ThirLit::Float(value)), Ty::Float)
}

pub fn boolean(value: bool) -> ThirExpr {
    expr(ThirExprKind::Literal(ThirLit::Bool(value)), Ty::Bool)
}

pub fn string(value: &str) -> ThirExpr {
    expr(ThirExprKind::Literal(ThirLit::Str(value.to_string())), Ty::String)
}

pub fn null(ty: Ty) -> ThirExpr {
    expr(ThirExprKind::Literal(ThirLit::Null), ty)
}

pub fn ident(name: &str, ty: Ty) -> ThirExpr {
    expr(ThirExprKind::Ident(name.to_string()), ty)
}

pub fn get(prefix: ThirExpr, name: &str, ty: Ty) -> ThirExpr {
    expr(
        ThirExprKind::Field {
            prefix: Box::new(prefix),
            name: name.to_string(),
        },
        ty,
    )
}

pub fn index(prefix: ThirExpr, position: ThirExpr, ty: Ty) -> ThirExpr {
    expr(
        ThirExprKind::Index {
            prefix: Box::new(prefix),
            index: Box::new(position),
        },
        ty,
    )
}

/// Comparisons and logical operators are bool; everything else has the
/// left operand's type.
pub fn binary(op: BinaryOp, lhs: ThirExpr, rhs: ThirExpr) -> ThirExpr {
    let ty = if op.is_comparison() || op.is_short_circuit() {
        Ty::Bool
    } else {
        lhs.ty.clone()
    };
    binary_typed(op, lhs, rhs, ty)
}

pub fn binary_typed(op: BinaryOp, lhs: ThirExpr, rhs: ThirExpr, ty: Ty) -> ThirExpr {
    expr(
        ThirExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        ty,
    )
}

pub fn unary(op: UnaryOp, operand: ThirExpr) -> ThirExpr {
    let ty = operand.ty.clone();
    expr(
        ThirExprKind::Unary {
            op,
            operand: Box::new(operand),
        },
        ty,
    )
}

pub fn call(function: FunctionId, args: Vec<ThirExpr>, ret: Ty) -> ThirExpr {
    generic_call(function, Vec::new(), args, ret)
}

pub fn generic_call(
    function: FunctionId,
    type_args: Vec<Ty>,
    args: Vec<ThirExpr>,
    ret: Ty,
) -> ThirExpr {
    expr(
        ThirExprKind::Call(ThirCall {
            callee: ThirCallee::Function {
                function,
                type_args,
            },
            prefix: None,
            args,
        }),
        ret,
    )
}

pub fn method_call(
    function: FunctionId,
    receiver: ThirExpr,
    args: Vec<ThirExpr>,
    ret: Ty,
) -> ThirExpr {
    expr(
        ThirExprKind::Call(ThirCall {
            callee: ThirCallee::Function {
                function,
                type_args: Vec::new(),
            },
            prefix: Some(Box::new(receiver)),
            args,
        }),
        ret,
    )
}

pub fn value_call(callee: ThirExpr, args: Vec<ThirExpr>, ret: Ty) -> ThirExpr {
    expr(
        ThirExprKind::Call(ThirCall {
            callee: ThirCallee::Value(Box::new(callee)),
            prefix: None,
            args,
        }),
        ret,
    )
}

pub fn external_call(name: &str, args: Vec<ThirExpr>, ret: Ty) -> ThirExpr {
    expr(
        ThirExprKind::Call(ThirCall {
            callee: ThirCallee::External(name.to_string()),
            prefix: None,
            args,
        }),
        ret,
    )
}

pub fn function_ref(function: FunctionId, ty: Ty) -> ThirExpr {
    expr(
        ThirExprKind::FunctionRef {
            function,
            type_args: Vec::new(),
        },
        ty,
    )
}

pub fn new(ty: Ty, args: Vec<ThirExpr>) -> ThirExpr {
    expr(ThirExprKind::New(args), ty)
}

pub fn new_array(element: Ty, count: ThirExpr) -> ThirExpr {
    let ty = Ty::heap(element.clone());
    expr(
        ThirExprKind::NewArray {
            element,
            count: Box::new(count),
        },
        ty,
    )
}

pub fn cast(operand: ThirExpr, ty: Ty) -> ThirExpr {
    expr(ThirExprKind::Cast(Box::new(operand)), ty)
}

pub fn clone_of(operand: ThirExpr) -> ThirExpr {
    let ty = operand.ty.clone();
    expr(ThirExprKind::Clone(Box::new(operand)), ty)
}

fn stmt(kind: ThirStmtKind) -> ThirStmt {
    ThirStmt::new(kind, Span::default())
}

/// Give a statement a distinct source line so diagnostics can be told apart.
pub fn at(line: u32, mut statement: ThirStmt) -> ThirStmt {
    statement.span = Span::line(line);
    statement
}

/// Call the host `print` with one int.
pub fn print(value: ThirExpr) -> ThirStmt {
    eval(external_call("print", vec![value], Ty::Void))
}

pub fn eval(value: ThirExpr) -> ThirStmt {
    stmt(ThirStmtKind::Expr(value))
}

pub fn let_(name: &str, ty: Ty, init: Option<ThirExpr>) -> ThirStmt {
    stmt(ThirStmtKind::Let(ThirLocal {
        name: name.to_string(),
        ty,
        init,
        owned: false,
    }))
}

/// Local released automatically when its scope exits.
pub fn let_owned(name: &str, ty: Ty, init: Option<ThirExpr>) -> ThirStmt {
    stmt(ThirStmtKind::Let(ThirLocal {
        name: name.to_string(),
        ty,
        init,
        owned: true,
    }))
}

pub fn assign(target: ThirExpr, value: ThirExpr) -> ThirStmt {
    stmt(ThirStmtKind::Assign {
        target,
        op: None,
        value,
    })
}

pub fn compound(target: ThirExpr, op: BinaryOp, value: ThirExpr) -> ThirStmt {
    stmt(ThirStmtKind::Assign {
        target,
        op: Some(op),
        value,
    })
}

pub fn block(stmts: Vec<ThirStmt>) -> ThirStmt {
    stmt(ThirStmtKind::Block(ThirBlock::new(stmts)))
}

pub fn if_(cond: ThirExpr, then: Vec<ThirStmt>, otherwise: Option<Vec<ThirStmt>>) -> ThirStmt {
    stmt(ThirStmtKind::If {
        branches: vec![ThirIfBranch {
            cond,
            body: ThirBlock::new(then),
        }],
        otherwise: otherwise.map(ThirBlock::new),
    })
}

pub fn while_(cond: ThirExpr, body: Vec<ThirStmt>) -> ThirStmt {
    stmt(ThirStmtKind::While {
        cond,
        body: ThirBlock::new(body),
    })
}

pub fn for_(
    init: Option<ThirStmt>,
    cond: Option<ThirExpr>,
    step: Option<ThirStmt>,
    body: Vec<ThirStmt>,
) -> ThirStmt {
    stmt(ThirStmtKind::For {
        init: init.map(Box::new),
        cond,
        step: step.map(Box::new),
        body: ThirBlock::new(body),
    })
}

pub fn break_() -> ThirStmt {
    stmt(ThirStmtKind::Break)
}

pub fn continue_() -> ThirStmt {
    stmt(ThirStmtKind::Continue)
}

pub fn ret(value: Option<ThirExpr>) -> ThirStmt {
    stmt(ThirStmtKind::Return(value))
}

pub fn delete(value: ThirExpr) -> ThirStmt {
    stmt(ThirStmtKind::Delete(value))
}
