use super::BodyLoweringContext;
use crate::{
    diagnostics::DiagnosticKind,
    index::Index,
    middle::{
        hir::{self, BinaryOperator, ExpressionKind, Fixity, IncDecOperator, UnaryOperator},
        mir::{
            self, AssignSource, BlockId, BuiltinKind, LiteralId, OperatorKind, StatementKind,
            SubroutineId, ValueId,
        },
    },
};

/// Result of lowering one expression
#[derive(Debug, Clone, Copy)]
pub(super) struct Lowered {
    pub value: ValueId,
    /// The receiver, for expressions that access a member or element of it
    pub object: Option<ValueId>,
    /// `value` holds a reference to the result instead of the result itself
    pub is_reference: bool,
}

impl Lowered {
    fn value(value: ValueId) -> Self {
        Self {
            value,
            object: None,
            is_reference: false,
        }
    }
}

impl<'hir> BodyLoweringContext<'hir> {
    fn push_literal(&mut self, ty: hir::TypeId, value: hir::LiteralValue) -> LiteralId {
        let id = self.literals.next_index();
        self.literals.push(mir::Literal { id, ty, value })
    }

    /// Lowers an expression in a context that needs an actual value,
    /// dereferencing the result if necessary
    pub(super) fn lower_value(
        &mut self,
        expression: &'hir hir::Expression,
        block: BlockId,
    ) -> ValueId {
        let lowered = self.lower_expression(expression, block, false);
        if !lowered.is_reference {
            return lowered.value;
        }

        let result = self.create_temporary(expression.ty);
        self.push_statement(
            block,
            StatementKind::Operator {
                kind: OperatorKind::Deref,
                result,
                arguments: vec![lowered.value],
            },
            expression.location,
        );
        result
    }

    /// Literals and subroutine references are assigned directly instead of
    /// going through a temporary
    pub(super) fn lower_assign_source(
        &mut self,
        expression: &'hir hir::Expression,
        block: BlockId,
    ) -> AssignSource {
        match &expression.kind {
            ExpressionKind::Literal(value) => {
                AssignSource::Literal(self.push_literal(expression.ty, value.clone()))
            }
            ExpressionKind::Function(function) => {
                AssignSource::Subroutine(SubroutineId::new(function.index()))
            }
            _ => AssignSource::Value(self.lower_value(expression, block)),
        }
    }

    fn lower_values(
        &mut self,
        expressions: &'hir [hir::Expression],
        block: BlockId,
    ) -> Vec<ValueId> {
        expressions
            .iter()
            .map(|e| self.lower_value(e, block))
            .collect()
    }

    /// Lowers `expression` into `block`. With `reference` set, places
    /// (variables, elements and members) are lowered to references so they can
    /// be written through.
    pub(super) fn lower_expression(
        &mut self,
        expression: &'hir hir::Expression,
        block: BlockId,
        reference: bool,
    ) -> Lowered {
        let location = expression.location;

        match &expression.kind {
            ExpressionKind::Literal(value) => {
                let literal = self.push_literal(expression.ty, value.clone());
                let result = self.create_temporary(expression.ty);
                self.push_statement(
                    block,
                    StatementKind::Assign {
                        destination: result,
                        source: AssignSource::Literal(literal),
                    },
                    location,
                );
                Lowered::value(result)
            }
            ExpressionKind::Variable(variable) => match self.variable_map.get(variable) {
                Some(value) => Lowered::value(*value),
                None => {
                    self.error(
                        DiagnosticKind::MissingSymbol,
                        location,
                        format!(
                            "{variable:?} is not a variable of `{}`",
                            self.function.symbol.name
                        ),
                    );
                    Lowered::value(self.create_temporary(expression.ty))
                }
            },
            ExpressionKind::Function(function) => {
                let result = self.create_temporary(expression.ty);
                self.push_statement(
                    block,
                    StatementKind::Assign {
                        destination: result,
                        source: AssignSource::Subroutine(SubroutineId::new(function.index())),
                    },
                    location,
                );
                Lowered::value(result)
            }
            ExpressionKind::Unary { operator, operand } => {
                let operand = self.lower_value(operand, block);
                let kind = match operator {
                    UnaryOperator::Plus => OperatorKind::Pos,
                    UnaryOperator::Negate => OperatorKind::Neg,
                    UnaryOperator::Not => OperatorKind::Not,
                    UnaryOperator::BitNot => OperatorKind::BitNot,
                };
                Lowered::value(self.emit_operator(kind, expression, vec![operand], block))
            }
            ExpressionKind::Binary { operator, lhs, rhs } => {
                let lhs = self.lower_value(lhs, block);
                let rhs = self.lower_value(rhs, block);

                // `a > b` is `b < a`; operands are still evaluated left to right
                let (kind, arguments) = match operator {
                    BinaryOperator::Greater => (OperatorKind::Less, vec![rhs, lhs]),
                    BinaryOperator::GreaterEqual => (OperatorKind::LessEqual, vec![rhs, lhs]),
                    other => (binary_operator(*other), vec![lhs, rhs]),
                };
                Lowered::value(self.emit_operator(kind, expression, arguments, block))
            }
            ExpressionKind::IncDec {
                operator,
                fixity,
                target,
            } => {
                if !target.kind.is_place() {
                    self.error(
                        DiagnosticKind::InvalidIncrementTarget,
                        target.location,
                        "only variables, elements and members can be incremented or decremented",
                    );
                    return Lowered::value(self.create_temporary(expression.ty));
                }

                let target = self.lower_expression(target, block, true);
                let kind = match operator {
                    IncDecOperator::Increment => OperatorKind::Increment,
                    IncDecOperator::Decrement => OperatorKind::Decrement,
                };

                match fixity {
                    Fixity::Prefix => Lowered::value(self.emit_operator(
                        kind,
                        expression,
                        vec![target.value],
                        block,
                    )),
                    Fixity::Postfix => {
                        let previous = self.emit_operator(
                            OperatorKind::Deref,
                            expression,
                            vec![target.value],
                            block,
                        );
                        self.emit_operator(kind, expression, vec![target.value], block);
                        Lowered::value(previous)
                    }
                }
            }
            ExpressionKind::Assign { target, value } => {
                if !target.kind.is_place() {
                    self.error(
                        DiagnosticKind::InvalidAssignmentTarget,
                        target.location,
                        "only variables, elements and members can be assigned to",
                    );
                    return Lowered::value(self.create_temporary(expression.ty));
                }

                let target = self.lower_expression(target, block, true);
                let source = self.lower_assign_source(value, block);
                self.push_statement(
                    block,
                    StatementKind::Assign {
                        destination: target.value,
                        source,
                    },
                    location,
                );
                target
            }
            ExpressionKind::Call { callee, arguments } => {
                self.lower_call(expression, callee, arguments, block)
            }
            ExpressionKind::Index { object, index } => {
                let object = self.lower_expression(object, block, reference).value;
                let index = self.lower_value(index, block);
                let kind = match reference {
                    true => OperatorKind::IndexRef,
                    false => OperatorKind::Index,
                };

                Lowered {
                    value: self.emit_operator(kind, expression, vec![object, index], block),
                    object: Some(object),
                    is_reference: reference,
                }
            }
            ExpressionKind::Member { object, key } => {
                let Some(name) = self.member_name(key) else {
                    return Lowered::value(self.create_temporary(expression.ty));
                };

                let object = self.lower_expression(object, block, reference).value;
                let result = self.create_temporary(expression.ty);
                let kind = match reference {
                    true => StatementKind::MemberRef {
                        result,
                        object,
                        name,
                    },
                    false => StatementKind::Member {
                        result,
                        object,
                        name,
                    },
                };
                self.push_statement(block, kind, location);

                Lowered {
                    value: result,
                    object: Some(object),
                    is_reference: reference,
                }
            }
            ExpressionKind::Cast { value, target } => {
                let value = self.lower_value(value, block);
                let result = self.create_temporary(*target);
                self.emit_builtin(
                    BuiltinKind::Cast,
                    Some(*target),
                    Some(result),
                    vec![value],
                    expression,
                    block,
                );
                Lowered::value(result)
            }
            ExpressionKind::Make { target, arguments } => {
                let arguments = self.lower_values(arguments, block);
                let result = self.create_temporary(*target);
                self.emit_builtin(
                    BuiltinKind::Make,
                    Some(*target),
                    Some(result),
                    arguments,
                    expression,
                    block,
                );
                Lowered::value(result)
            }
            ExpressionKind::Print(arguments) => {
                let arguments = self.lower_values(arguments, block);
                self.emit_builtin(BuiltinKind::Print, None, None, arguments, expression, block);
                Lowered::value(self.create_temporary(expression.ty))
            }
            ExpressionKind::TypeOf(value) => {
                let value = self.lower_value(value, block);
                let result = self.create_temporary(expression.ty);
                self.emit_builtin(
                    BuiltinKind::TypeOf,
                    None,
                    Some(result),
                    vec![value],
                    expression,
                    block,
                );
                Lowered::value(result)
            }
        }
    }

    fn lower_call(
        &mut self,
        expression: &'hir hir::Expression,
        callee: &'hir hir::Expression,
        arguments: &'hir [hir::Expression],
        block: BlockId,
    ) -> Lowered {
        match &callee.kind {
            ExpressionKind::Function(function) => {
                let arguments = self.lower_values(arguments, block);
                let result = self.create_temporary(expression.ty);
                self.push_statement(
                    block,
                    StatementKind::Call {
                        result,
                        callee: SubroutineId::new(function.index()),
                        arguments,
                    },
                    expression.location,
                );
                Lowered::value(result)
            }
            // method call, the receiver goes first
            ExpressionKind::Member { .. } => {
                let method = self.lower_expression(callee, block, false);
                let mut operands = vec![method.value];
                operands.extend(method.object);
                operands.extend(self.lower_values(arguments, block));

                Lowered::value(self.emit_operator(OperatorKind::Call, expression, operands, block))
            }
            _ => {
                let callee = self.lower_value(callee, block);
                let mut operands = vec![callee];
                operands.extend(self.lower_values(arguments, block));

                Lowered::value(self.emit_operator(OperatorKind::Call, expression, operands, block))
            }
        }
    }

    /// Member keys must be string literals; they are pooled as the member name
    fn member_name(&mut self, key: &'hir hir::Expression) -> Option<LiteralId> {
        match &key.kind {
            ExpressionKind::Literal(value @ hir::LiteralValue::String(_)) => {
                Some(self.push_literal(key.ty, value.clone()))
            }
            _ => {
                self.error(
                    DiagnosticKind::NonLiteralMemberKey,
                    key.location,
                    "member keys must be string literals",
                );
                None
            }
        }
    }

    fn emit_operator(
        &mut self,
        kind: OperatorKind,
        expression: &'hir hir::Expression,
        arguments: Vec<ValueId>,
        block: BlockId,
    ) -> ValueId {
        let result = self.create_temporary(expression.ty);
        self.push_statement(
            block,
            StatementKind::Operator {
                kind,
                result,
                arguments,
            },
            expression.location,
        );
        result
    }

    fn emit_builtin(
        &mut self,
        kind: BuiltinKind,
        template: Option<hir::TypeId>,
        result: Option<ValueId>,
        arguments: Vec<ValueId>,
        expression: &'hir hir::Expression,
        block: BlockId,
    ) {
        self.push_statement(
            block,
            StatementKind::Builtin {
                kind,
                template,
                result,
                arguments,
            },
            expression.location,
        );
    }
}

fn binary_operator(operator: BinaryOperator) -> OperatorKind {
    match operator {
        BinaryOperator::LogicalOr => OperatorKind::Or,
        BinaryOperator::LogicalAnd => OperatorKind::And,
        BinaryOperator::BitOr => OperatorKind::BitOr,
        BinaryOperator::BitXor => OperatorKind::BitXor,
        BinaryOperator::BitAnd => OperatorKind::BitAnd,
        BinaryOperator::Equal => OperatorKind::Equal,
        BinaryOperator::NotEqual => OperatorKind::NotEqual,
        BinaryOperator::Less => OperatorKind::Less,
        BinaryOperator::LessEqual => OperatorKind::LessEqual,
        // normalized by the caller, never reached
        BinaryOperator::Greater => OperatorKind::Less,
        BinaryOperator::GreaterEqual => OperatorKind::LessEqual,
        BinaryOperator::ShiftLeft => OperatorKind::ShiftLeft,
        BinaryOperator::ShiftRight => OperatorKind::ShiftRight,
        BinaryOperator::Add => OperatorKind::Add,
        BinaryOperator::Subtract => OperatorKind::Subtract,
        BinaryOperator::Multiply => OperatorKind::Multiply,
        BinaryOperator::Divide => OperatorKind::Divide,
        BinaryOperator::Remainder => OperatorKind::Remainder,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use crate::index::Index;

    use crate::{
        diagnostics::{DiagnosticKind, Diagnostics},
        middle::{
            hir::{Fixity, IncDecOperator, build::ProgramBuilder},
            mir::{
                self, AssignSource, OperatorKind, StatementKind, SubroutineId,
                hir_lowering::lower_to_mir,
            },
        },
    };

    fn entry_statements(program: &mir::Program) -> Vec<StatementKind> {
        let body = program.subroutines[SubroutineId::new(0)].body().unwrap();
        body.blocks[body.entry]
            .statements
            .iter()
            .map(|s| s.kind.clone())
            .collect()
    }

    #[test]
    fn postfix_increment_yields_the_previous_value() {
        let mut b = ProgramBuilder::new();
        let int = b.int_ty();
        let f = b.function("bump", &[], int);
        let i = b.local(f, "i", int);
        let target = b.variable(f, i);
        let inc = b.inc_dec(IncDecOperator::Increment, Fixity::Postfix, target);
        let ret = b.return_(Some(inc));
        b.define(f, ret);

        let mut diagnostics = Diagnostics::new();
        let program = lower_to_mir(&b.finish(), &mut diagnostics);
        let body = program.subroutines[SubroutineId::new(0)].body().unwrap();
        let i = body.locals[0];
        let (previous, incremented) = (body.temporaries[0], body.temporaries[1]);

        assert_eq!(
            entry_statements(&program),
            vec![
                StatementKind::Operator {
                    kind: OperatorKind::Deref,
                    result: previous,
                    arguments: vec![i],
                },
                StatementKind::Operator {
                    kind: OperatorKind::Increment,
                    result: incremented,
                    arguments: vec![i],
                },
                StatementKind::Assign {
                    destination: body.return_value,
                    source: AssignSource::Value(previous),
                },
            ]
        );
    }

    #[test]
    fn element_assignment_writes_through_a_reference() {
        let mut b = ProgramBuilder::new();
        let void = b.void_ty();
        let int = b.int_ty();
        let array = b.array_ty(int);
        let f = b.function("store", &[("xs", array)], void);
        let xs = b.parameter(f, 0);
        let xs = b.variable(f, xs);
        let zero = b.int(0);
        let element = b.index(xs, zero);
        let seven = b.int(7);
        let assign = b.assign(element, seven);
        let stmt = b.expr(assign);
        b.define(f, stmt);

        let mut diagnostics = Diagnostics::new();
        let program = lower_to_mir(&b.finish(), &mut diagnostics);
        let statements = entry_statements(&program);

        assert!(diagnostics.is_empty());
        let StatementKind::Operator {
            kind: OperatorKind::IndexRef,
            result: reference,
            ..
        } = &statements[1]
        else {
            panic!("expected an element reference, got {:?}", statements[1]);
        };
        assert!(matches!(
            statements[2],
            StatementKind::Assign {
                destination,
                source: AssignSource::Literal(_),
            } if destination == *reference
        ));
    }

    #[test]
    fn invalid_targets_emit_nothing() {
        let mut b = ProgramBuilder::new();
        let void = b.void_ty();
        let f = b.function("bad", &[], void);
        let one = b.int(1);
        let two = b.int(2);
        let assign = b.assign(one, two);
        let assign = b.expr(assign);
        let three = b.int(3);
        let inc = b.inc_dec(IncDecOperator::Decrement, Fixity::Prefix, three);
        let inc = b.expr(inc);
        let body = b.block(vec![assign, inc]);
        b.define(f, body);

        let mut diagnostics = Diagnostics::new();
        let program = lower_to_mir(&b.finish(), &mut diagnostics);

        assert_eq!(
            diagnostics.iter().map(|d| d.kind).collect::<Vec<_>>(),
            vec![
                DiagnosticKind::InvalidAssignmentTarget,
                DiagnosticKind::InvalidIncrementTarget
            ]
        );
        let body = program.subroutines[SubroutineId::new(0)].body().unwrap();
        assert!(body.blocks.iter().all(|block| block.statements.is_empty()));
    }

    #[test]
    fn method_calls_pass_the_receiver_first() {
        let mut b = ProgramBuilder::new();
        let dynamic = b.dynamic_ty();
        let f = b.function("call_method", &[("object", dynamic)], dynamic);
        let object = b.parameter(f, 0);
        let object = b.variable(f, object);
        let method = b.member(object, "greet");
        let argument = b.string("world");
        let call = b.call(method, vec![argument]);
        let ret = b.return_(Some(call));
        b.define(f, ret);

        let mut diagnostics = Diagnostics::new();
        let program = lower_to_mir(&b.finish(), &mut diagnostics);
        let body = program.subroutines[SubroutineId::new(0)].body().unwrap();
        let object = body.parameters[0];
        let statements = entry_statements(&program);

        let StatementKind::Member {
            result: method,
            object: receiver,
            name,
        } = statements[0]
        else {
            panic!("expected the method lookup first");
        };
        assert_eq!(receiver, object);
        assert_eq!(
            program.literals[name].value,
            crate::middle::hir::LiteralValue::String("greet".into())
        );

        let StatementKind::Operator {
            kind: OperatorKind::Call,
            arguments,
            ..
        } = &statements[2]
        else {
            panic!("expected the indirect call, got {:?}", statements[2]);
        };
        assert_eq!((arguments[0], arguments[1]), (method, object));
        assert_eq!(arguments.len(), 3);
    }

    #[test]
    fn non_literal_member_keys_are_rejected() {
        let mut b = ProgramBuilder::new();
        let dynamic = b.dynamic_ty();
        let f = b.function("lookup", &[("object", dynamic), ("key", dynamic)], dynamic);
        let (object, key) = (b.parameter(f, 0), b.parameter(f, 1));
        let object = b.variable(f, object);
        let key = b.variable(f, key);
        let member = b.member_with_key(object, key);
        let ret = b.return_(Some(member));
        b.define(f, ret);

        let mut diagnostics = Diagnostics::new();
        lower_to_mir(&b.finish(), &mut diagnostics);

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics.iter().next().unwrap().kind,
            DiagnosticKind::NonLiteralMemberKey
        );
    }
}
