//! Programmatic construction of resolved HIR. The real front end produces the
//! same tree; this builder is what tests and embedders use to drive the
//! back end without one.

use hashbrown::HashMap;

use super::*;
use crate::{
    index::Index,
    source::{SourceFileId, SourceFileOrigin},
};

pub struct ProgramBuilder {
    program: Program,
    file: SourceFileId,
    line: u32,
    next_expression: ExpressionId,
    next_variable: HashMap<FunctionId, VariableId>,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self {
            program: Program {
                files: vec![SourceFile {
                    origin: SourceFileOrigin::Memory,
                }],
                types: TypeTable::new(),
                functions: IndexVec::new(),
                classes: IndexVec::new(),
                entry: None,
            },
            file: SourceFileId::new(0),
            line: 1,
            next_expression: ExpressionId::new(0),
            next_variable: HashMap::new(),
        }
    }

    pub fn finish(self) -> Program {
        self.program
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Subsequent nodes are attributed to `line`
    pub fn at(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    fn location(&self) -> SourceLocation {
        SourceLocation::new(self.file, self.line, 1)
    }

    fn symbol(&self, name: &str) -> Symbol {
        Symbol {
            name: name.into(),
            location: self.location(),
        }
    }

    /* Types */

    pub fn void_ty(&mut self) -> TypeId {
        self.program.types.intern(TypeKind::Void)
    }

    pub fn dynamic_ty(&mut self) -> TypeId {
        self.program.types.intern(TypeKind::Dynamic)
    }

    pub fn primitive_ty(&mut self, kind: PrimitiveKind) -> TypeId {
        self.program.types.primitive(kind)
    }

    pub fn int_ty(&mut self) -> TypeId {
        self.primitive_ty(PrimitiveKind::Int)
    }

    pub fn bool_ty(&mut self) -> TypeId {
        self.primitive_ty(PrimitiveKind::Bool)
    }

    pub fn string_ty(&mut self) -> TypeId {
        self.primitive_ty(PrimitiveKind::String)
    }

    pub fn array_ty(&mut self, element: TypeId) -> TypeId {
        self.program.types.intern(TypeKind::Array(element))
    }

    pub fn function_ty(&mut self, parameters: Vec<TypeId>, return_type: TypeId) -> TypeId {
        self.program.types.intern(TypeKind::Function {
            parameters,
            return_type,
        })
    }

    /* Items */

    fn push_function(
        &mut self,
        name: &str,
        parameters: Vec<TypeId>,
        return_type: TypeId,
        linkage: Linkage,
        is_method: bool,
        kind: FunctionKind,
    ) -> FunctionId {
        let ty = self.function_ty(parameters, return_type);
        let symbol = self.symbol(name);
        self.program.functions.push(Function {
            symbol,
            ty,
            linkage,
            is_method,
            kind,
        })
    }

    fn variables(&mut self, function: FunctionId, variables: &[(&str, TypeId)]) -> Vec<Variable> {
        variables
            .iter()
            .map(|(name, ty)| Variable {
                id: self.create_variable_id(function),
                symbol: self.symbol(name),
                ty: *ty,
            })
            .collect()
    }

    fn create_variable_id(&mut self, function: FunctionId) -> VariableId {
        let next = self
            .next_variable
            .entry(function)
            .or_insert(VariableId::new(0));
        let id = *next;
        next.increment_by(1);
        id
    }

    /// Adds a defined function with an empty body; see [`Self::define`]
    pub fn function(
        &mut self,
        name: &str,
        parameters: &[(&str, TypeId)],
        return_type: TypeId,
    ) -> FunctionId {
        self.defined_function(name, parameters, return_type, false)
    }

    fn defined_function(
        &mut self,
        name: &str,
        parameters: &[(&str, TypeId)],
        return_type: TypeId,
        is_method: bool,
    ) -> FunctionId {
        let location = self.location();
        let id = self.push_function(
            name,
            parameters.iter().map(|(_, ty)| *ty).collect(),
            return_type,
            Linkage::Internal,
            is_method,
            FunctionKind::Declared,
        );
        let parameters = self.variables(id, parameters);
        self.program.functions[id].kind = FunctionKind::Defined {
            parameters,
            locals: Vec::new(),
            body: Statement {
                kind: StatementKind::Block(Vec::new()),
                location,
            },
        };
        id
    }

    /// Adds a method to `class`. The receiver is passed as an implicit first
    /// parameter named `self`, which is [`Self::parameter`] index 0.
    pub fn method(
        &mut self,
        class: ClassId,
        name: &str,
        parameters: &[(&str, TypeId)],
        return_type: TypeId,
    ) -> FunctionId {
        let receiver = self.program.classes[class].ty;
        let parameters = std::iter::once(("self", receiver))
            .chain(parameters.iter().copied())
            .collect::<Vec<_>>();
        let id = self.defined_function(name, &parameters, return_type, true);
        self.program.classes[class].methods.push(id);
        id
    }

    pub fn declare(
        &mut self,
        name: &str,
        parameters: &[TypeId],
        return_type: TypeId,
    ) -> FunctionId {
        self.push_function(
            name,
            parameters.to_vec(),
            return_type,
            Linkage::Internal,
            false,
            FunctionKind::Declared,
        )
    }

    /// Adds a foreign function imported from a native library
    pub fn import(
        &mut self,
        name: &str,
        library: &str,
        parameters: &[TypeId],
        return_type: TypeId,
    ) -> FunctionId {
        self.push_function(
            name,
            parameters.to_vec(),
            return_type,
            Linkage::Foreign,
            false,
            FunctionKind::Imported {
                library: library.to_owned(),
                entry_point: None,
            },
        )
    }

    pub fn parameter(&self, function: FunctionId, index: usize) -> VariableId {
        match &self.program.functions[function].kind {
            FunctionKind::Defined { parameters, .. } => parameters[index].id,
            _ => panic!("{function:?} has no parameters to refer to"),
        }
    }

    pub fn local(&mut self, function: FunctionId, name: &str, ty: TypeId) -> VariableId {
        let variable = self.variables(function, &[(name, ty)]).remove(0);
        let id = variable.id;
        match &mut self.program.functions[function].kind {
            FunctionKind::Defined { locals, .. } => locals.push(variable),
            _ => panic!("{function:?} is not a defined function"),
        }
        id
    }

    pub fn define(&mut self, function: FunctionId, statement: Statement) {
        match &mut self.program.functions[function].kind {
            FunctionKind::Defined { body, .. } => *body = statement,
            _ => panic!("{function:?} is not a defined function"),
        }
    }

    pub fn set_entry(&mut self, function: FunctionId) {
        self.program.entry = Some(function);
    }

    pub fn class(
        &mut self,
        name: &str,
        parent: Option<ClassId>,
        fields: &[(&str, TypeId)],
    ) -> ClassId {
        let id = self.program.classes.next_index();
        let ty = self.program.types.intern(TypeKind::Class {
            class: id,
            arguments: Vec::new(),
        });
        let fields = fields
            .iter()
            .enumerate()
            .map(|(i, (name, ty))| Variable {
                id: VariableId::new(i),
                symbol: self.symbol(name),
                ty: *ty,
            })
            .collect();
        let symbol = self.symbol(name);
        self.program.classes.push(Class {
            symbol,
            ty,
            parent,
            fields,
            methods: Vec::new(),
        })
    }

    pub fn class_ty(&self, class: ClassId) -> TypeId {
        self.program.classes[class].ty
    }

    /* Expressions */

    fn expression(&mut self, ty: TypeId, kind: ExpressionKind) -> Expression {
        let id = self.next_expression;
        self.next_expression.increment_by(1);
        Expression {
            id,
            ty,
            location: self.location(),
            kind,
        }
    }

    pub fn literal(&mut self, value: LiteralValue) -> Expression {
        let ty = self.primitive_ty(value.primitive());
        self.expression(ty, ExpressionKind::Literal(value))
    }

    pub fn int(&mut self, value: i32) -> Expression {
        self.literal(LiteralValue::Int(value))
    }

    pub fn boolean(&mut self, value: bool) -> Expression {
        self.literal(LiteralValue::Bool(value))
    }

    pub fn string(&mut self, value: &str) -> Expression {
        self.literal(LiteralValue::String(value.to_owned()))
    }

    pub fn variable(&mut self, function: FunctionId, variable: VariableId) -> Expression {
        let ty = match &self.program.functions[function].kind {
            FunctionKind::Defined {
                parameters, locals, ..
            } => parameters
                .iter()
                .chain(locals)
                .find(|v| v.id == variable)
                .map(|v| v.ty),
            _ => None,
        };
        let ty = match ty {
            Some(ty) => ty,
            None => self.dynamic_ty(),
        };
        self.expression(ty, ExpressionKind::Variable(variable))
    }

    pub fn function_ref(&mut self, function: FunctionId) -> Expression {
        let ty = self.program.functions[function].ty;
        self.expression(ty, ExpressionKind::Function(function))
    }

    pub fn unary(&mut self, operator: UnaryOperator, operand: Expression) -> Expression {
        let ty = match operator {
            UnaryOperator::Not => self.bool_ty(),
            _ => operand.ty,
        };
        self.expression(
            ty,
            ExpressionKind::Unary {
                operator,
                operand: Box::new(operand),
            },
        )
    }

    pub fn binary(
        &mut self,
        operator: BinaryOperator,
        lhs: Expression,
        rhs: Expression,
    ) -> Expression {
        use BinaryOperator::*;

        let ty = match operator {
            LogicalOr | LogicalAnd | Equal | NotEqual | Less | LessEqual | Greater
            | GreaterEqual => self.bool_ty(),
            _ => lhs.ty,
        };
        self.expression(
            ty,
            ExpressionKind::Binary {
                operator,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        )
    }

    pub fn inc_dec(
        &mut self,
        operator: IncDecOperator,
        fixity: Fixity,
        target: Expression,
    ) -> Expression {
        self.expression(
            target.ty,
            ExpressionKind::IncDec {
                operator,
                fixity,
                target: Box::new(target),
            },
        )
    }

    pub fn assign(&mut self, target: Expression, value: Expression) -> Expression {
        self.expression(
            target.ty,
            ExpressionKind::Assign {
                target: Box::new(target),
                value: Box::new(value),
            },
        )
    }

    pub fn call(&mut self, callee: Expression, arguments: Vec<Expression>) -> Expression {
        let ty = match self.program.types.signature(callee.ty) {
            Some((_, return_type)) => return_type,
            None => self.dynamic_ty(),
        };
        self.expression(
            ty,
            ExpressionKind::Call {
                callee: Box::new(callee),
                arguments,
            },
        )
    }

    /// Calls a function by id
    pub fn call_function(
        &mut self,
        function: FunctionId,
        arguments: Vec<Expression>,
    ) -> Expression {
        let callee = self.function_ref(function);
        self.call(callee, arguments)
    }

    pub fn index(&mut self, object: Expression, index: Expression) -> Expression {
        let ty = match self.program.types.get(object.ty) {
            TypeKind::Array(element) => *element,
            _ => self.dynamic_ty(),
        };
        self.expression(
            ty,
            ExpressionKind::Index {
                object: Box::new(object),
                index: Box::new(index),
            },
        )
    }

    /// Member access `object.name`, keyed by a string literal
    pub fn member(&mut self, object: Expression, name: &str) -> Expression {
        let key = self.string(name);
        self.member_with_key(object, key)
    }

    pub fn member_with_key(&mut self, object: Expression, key: Expression) -> Expression {
        let ty = self.dynamic_ty();
        self.expression(
            ty,
            ExpressionKind::Member {
                object: Box::new(object),
                key: Box::new(key),
            },
        )
    }

    pub fn cast(&mut self, value: Expression, target: TypeId) -> Expression {
        self.expression(
            target,
            ExpressionKind::Cast {
                value: Box::new(value),
                target,
            },
        )
    }

    pub fn make(&mut self, target: TypeId, arguments: Vec<Expression>) -> Expression {
        self.expression(target, ExpressionKind::Make { target, arguments })
    }

    pub fn print(&mut self, arguments: Vec<Expression>) -> Expression {
        let ty = self.void_ty();
        self.expression(ty, ExpressionKind::Print(arguments))
    }

    pub fn type_of(&mut self, value: Expression) -> Expression {
        let ty = self.string_ty();
        self.expression(ty, ExpressionKind::TypeOf(Box::new(value)))
    }

    /* Statements */

    fn statement(&self, kind: StatementKind) -> Statement {
        Statement {
            kind,
            location: self.location(),
        }
    }

    pub fn block(&self, statements: Vec<Statement>) -> Statement {
        self.statement(StatementKind::Block(statements))
    }

    pub fn if_(
        &self,
        condition: Expression,
        positive: Statement,
        negative: Option<Statement>,
    ) -> Statement {
        self.statement(StatementKind::If {
            condition,
            positive: Box::new(positive),
            negative: negative.map(Box::new),
        })
    }

    pub fn while_(&self, condition: Expression, body: Statement) -> Statement {
        self.statement(StatementKind::While {
            condition,
            body: Box::new(body),
        })
    }

    pub fn do_(&self, body: Statement, condition: Expression, negated: bool) -> Statement {
        self.statement(StatementKind::Do {
            body: Box::new(body),
            condition,
            negated,
        })
    }

    pub fn break_(&self) -> Statement {
        self.statement(StatementKind::Break)
    }

    pub fn return_(&self, value: Option<Expression>) -> Statement {
        self.statement(StatementKind::Return(value))
    }

    pub fn expr(&self, expression: Expression) -> Statement {
        self.statement(StatementKind::Expression(expression))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_ids_are_unique() {
        let mut b = ProgramBuilder::new();
        let one = b.int(1);
        let two = b.int(2);
        let sum = b.binary(BinaryOperator::Add, one, two);

        let ExpressionKind::Binary { lhs, rhs, .. } = &sum.kind else {
            panic!("expected a binary expression");
        };
        assert_ne!(lhs.id, rhs.id);
        assert_ne!(sum.id, lhs.id);
        assert_eq!(sum.ty, b.int_ty());
    }

    #[test]
    fn methods_receive_self_first() {
        let mut b = ProgramBuilder::new();
        let int = b.int_ty();
        let point = b.class("Point", None, &[("x", int)]);
        let get_x = b.method(point, "get_x", &[], int);

        let program = b.finish();
        let FunctionKind::Defined { parameters, .. } = &program.functions[get_x].kind else {
            panic!("methods are defined functions");
        };
        assert_eq!(parameters[0].symbol.name.value(), "self");
        assert_eq!(parameters[0].ty, program.classes[point].ty);
        assert_eq!(program.classes[point].methods, vec![get_x]);
    }

    #[test]
    fn programs_round_trip_through_json() {
        let mut b = ProgramBuilder::new();
        let int = b.int_ty();
        let main = b.function("main", &[], int);
        let zero = b.int(0);
        let body = b.return_(Some(zero));
        let body = b.block(vec![body]);
        b.define(main, body);
        b.set_entry(main);

        let json = serde_json::to_string(&b.finish()).unwrap();
        let decoded: Program = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.entry, Some(main));
        assert_eq!(decoded.functions[main].symbol.name.value(), "main");
    }
}
