use std::cmp::Ordering;

use crate::{
    backend::{
        assemblers::x86_64::{Operand, X86FullRegister},
        debug::DebugTables,
        isel::{Argument, FunctionSelector, SelectError},
        runtime::{Helper, Operation},
    },
    diagnostics::{DiagnosticKind, Stage},
    middle::{
        hir::{LiteralValue, PrimitiveKind, TypeId, TypeKind},
        mir::{
            AssignSource, BuiltinKind, LiteralId, OperatorKind, Statement, StatementKind,
            SubroutineId, ValueId, pretty_print,
        },
    },
};

impl FunctionSelector<'_, '_> {
    /// Emits one statement. A statement that can't be compiled is reported
    /// and skipped; only internal errors abandon the subroutine.
    pub(super) fn statement(&mut self, statement: &Statement) -> Result<(), SelectError> {
        if self.emitter.cx.debug_info {
            let label = self.label(format!("line{}", self.statements));
            self.statements += 1;
            if let Some(entry) = DebugTables::line_entry(&label, statement.location) {
                self.emitter.asm.label(label);
                self.lines.push(entry);
            }
        }

        let text = pretty_print::statement_to_string(self.program, self.body, &statement.kind);
        self.emitter.asm.comment(strip_ansi_escapes::strip_str(text));

        match self.select_statement(&statement.kind) {
            Err(SelectError::Rejected { kind, message }) => {
                self.emitter
                    .cx
                    .diagnostics
                    .error(Stage::Codegen, kind, statement.location, message);
                Ok(())
            }
            result => result,
        }
    }

    // Every arm validates before it emits anything, so a rejected statement
    // leaves no partial code behind.
    fn select_statement(&mut self, kind: &StatementKind) -> Result<(), SelectError> {
        match kind {
            StatementKind::Operator {
                kind,
                result,
                arguments,
            } => self.operator(*kind, *result, arguments),
            StatementKind::Call {
                result,
                callee,
                arguments,
            } => self.direct_call(*result, *callee, arguments),
            StatementKind::Member {
                result,
                object,
                name,
            } => {
                let [pointer, length] = self.member_name(*name)?;
                let arguments = [self.value(*result)?, self.value(*object)?, pointer, length];
                self.emitter
                    .call_operation(Operation::Member, &arguments, 1);
                Ok(())
            }
            StatementKind::MemberRef {
                result,
                object,
                name,
            } => {
                let [pointer, length] = self.member_name(*name)?;
                let destination = self.reference_slot(*result)?;
                let arguments = [self.value(*object)?, pointer, length];
                self.emitter
                    .call_operation(Operation::MemberRef, &arguments, 0);
                self.store_reference(destination);
                Ok(())
            }
            StatementKind::Builtin {
                kind,
                template,
                result,
                arguments,
            } => self.builtin(*kind, *template, *result, arguments),
            StatementKind::Assign {
                destination,
                source,
            } => self.assign(*destination, *source),
        }
    }

    fn member_name(&mut self, name: LiteralId) -> Result<[Argument; 2], SelectError> {
        match self.program.literals.get(name).map(|l| &l.value) {
            Some(LiteralValue::String(value)) => Ok(self.emitter.string(value)),
            _ => Err(SelectError::UnusableLiteral(name)),
        }
    }

    /// Offset of a slot that receives a `Value*` from the runtime
    fn reference_slot(&self, value: ValueId) -> Result<i64, SelectError> {
        match self.emitter.frame.slot(value) {
            Some(slot) if slot.by_reference => Ok(slot.offset),
            Some(_) => Err(SelectError::NotAReference(value)),
            None => Err(SelectError::MissingSlot(value)),
        }
    }

    fn store_reference(&mut self, offset: i64) {
        self.emitter
            .asm
            .movq(Operand::reg(X86FullRegister::Rax), Operand::frame(offset));
    }

    fn operator(
        &mut self,
        kind: OperatorKind,
        result: ValueId,
        arguments: &[ValueId],
    ) -> Result<(), SelectError> {
        let operation = Operation::for_operator(kind);

        match kind {
            // call(result*, callee*, argc, args*...)
            OperatorKind::Call => {
                let Some((callee, rest)) = arguments.split_first() else {
                    return Err(SelectError::rejected(
                        DiagnosticKind::WrongArgumentCount,
                        "indirect call without a callee",
                    ));
                };
                let mut marshalled = vec![
                    self.value(result)?,
                    self.value(*callee)?,
                    Argument::Immediate(rest.len() as i64),
                ];
                marshalled.extend(self.values(rest)?);
                self.emitter.call_operation(operation, &marshalled, 1);
            }
            // index_ref(object*, key*) -> Value*
            OperatorKind::IndexRef => {
                expect_operands(kind, arguments, 2)?;
                let destination = self.reference_slot(result)?;
                let marshalled = self.values(arguments)?;
                self.emitter.call_operation(operation, &marshalled, 0);
                self.store_reference(destination);
            }
            _ => {
                expect_operands(kind, arguments, operand_count(kind))?;
                let mut marshalled = vec![self.value(result)?];
                marshalled.extend(self.values(arguments)?);
                self.emitter.call_operation(operation, &marshalled, 1);
            }
        }

        Ok(())
    }

    fn direct_call(
        &mut self,
        result: ValueId,
        callee: SubroutineId,
        arguments: &[ValueId],
    ) -> Result<(), SelectError> {
        let subroutine = self
            .program
            .subroutines
            .get(callee)
            .ok_or(SelectError::MissingSubroutine(callee))?;
        if subroutine.is_foreign() {
            return self.foreign_call(result, callee, arguments);
        }

        if let Some((parameters, _)) = self.program.types.signature(subroutine.ty) {
            let name = pretty_print::subroutine_name(self.program, callee);
            check_argument_count(&name, parameters.len(), arguments.len())?;
        }

        let mut marshalled = vec![self.value(result)?];
        marshalled.extend(self.values(arguments)?);
        let symbol = self.emitter.cx.subroutine_symbol(callee)?;
        self.emitter.call_direct(&symbol, &marshalled);

        Ok(())
    }

    fn builtin(
        &mut self,
        kind: BuiltinKind,
        template: Option<TypeId>,
        result: Option<ValueId>,
        arguments: &[ValueId],
    ) -> Result<(), SelectError> {
        match kind {
            BuiltinKind::Print => {
                for argument in self.values(arguments)? {
                    self.emitter.call_helper(Helper::PrintValue, &[argument]);
                }
                Ok(())
            }
            BuiltinKind::TypeOf => {
                let [value] = arguments else {
                    return Err(SelectError::rejected(
                        DiagnosticKind::WrongArgumentCount,
                        "typeof takes exactly one value",
                    ));
                };
                let result = result.ok_or(SelectError::MissingResult)?;
                let marshalled = [self.value(result)?, self.value(*value)?];
                self.emitter
                    .call_operation(Operation::TypeName, &marshalled, 1);
                Ok(())
            }
            BuiltinKind::Cast => {
                let result = result.ok_or(SelectError::MissingResult)?;
                self.cast(template, result, arguments)
            }
            BuiltinKind::Make => {
                let result = result.ok_or(SelectError::MissingResult)?;
                self.make(template, result, arguments)
            }
        }
    }

    fn cast(
        &mut self,
        target: Option<TypeId>,
        result: ValueId,
        arguments: &[ValueId],
    ) -> Result<(), SelectError> {
        let target = target.ok_or_else(|| {
            SelectError::rejected(DiagnosticKind::UnimplementedCast, "cast without a target type")
        })?;
        let [value] = arguments else {
            return Err(SelectError::rejected(
                DiagnosticKind::WrongArgumentCount,
                "cast takes exactly one value",
            ));
        };
        let (result, value) = (self.value(result)?, self.value(*value)?);

        match self.program.types.get(target) {
            TypeKind::Primitive(kind) => self.emitter.call_operation(
                Operation::Cast,
                &[result, value, Argument::Immediate(kind.tag())],
                1,
            ),
            TypeKind::Dynamic => self
                .emitter
                .call_operation(Operation::Assign, &[result, value], 1),
            _ => {
                return Err(SelectError::rejected(
                    DiagnosticKind::UnimplementedCast,
                    format!(
                        "cast to `{}` is not implemented",
                        self.program.type_name(target)
                    ),
                ));
            }
        }

        Ok(())
    }

    fn make(
        &mut self,
        target: Option<TypeId>,
        result: ValueId,
        arguments: &[ValueId],
    ) -> Result<(), SelectError> {
        let target = target.ok_or_else(|| {
            SelectError::rejected(
                DiagnosticKind::UnsupportedMakeTarget,
                "make without a target type",
            )
        })?;
        let name = self.program.type_name(target);
        let destination = self.value(result)?;
        let no_arguments = || {
            SelectError::rejected(
                DiagnosticKind::WrongArgumentCount,
                format!("make<{name}> takes no arguments"),
            )
        };

        match self.program.types.get(target) {
            TypeKind::Primitive(kind) => match arguments {
                [] => {
                    self.emitter.drop_value(destination.clone());
                    self.emitter.default_initialize(destination, target);
                }
                [value] => {
                    let value = self.value(*value)?;
                    self.emitter.call_operation(
                        Operation::Cast,
                        &[destination, value, Argument::Immediate(kind.tag())],
                        1,
                    );
                }
                _ => {
                    return Err(SelectError::rejected(
                        DiagnosticKind::WrongArgumentCount,
                        format!("make<{name}> takes at most one value"),
                    ));
                }
            },
            TypeKind::Array(_) => {
                if !arguments.is_empty() {
                    return Err(no_arguments());
                }
                self.emitter.drop_value(destination.clone());
                self.emitter.call_helper(Helper::MakeArray, &[destination]);
            }
            TypeKind::Class { .. } => {
                if !arguments.is_empty() {
                    return Err(no_arguments());
                }
                if self.program.class_of_type(target).is_none() {
                    return Err(SelectError::rejected(
                        DiagnosticKind::UnsupportedMakeTarget,
                        format!("class `{name}` has no layout"),
                    ));
                }
                let initializer = self.emitter.cx.initializer_symbol(target);
                self.emitter.drop_value(destination.clone());
                self.emitter.call_direct(&initializer, &[destination]);
            }
            TypeKind::Void | TypeKind::Dynamic | TypeKind::Function { .. } => {
                return Err(SelectError::rejected(
                    DiagnosticKind::UnsupportedMakeTarget,
                    format!("can't make a value of type `{name}`"),
                ));
            }
        }

        Ok(())
    }

    /// Literal and subroutine sources build a fresh value in place of the
    /// destination's old one
    fn assign(&mut self, destination: ValueId, source: AssignSource) -> Result<(), SelectError> {
        let target = self.value(destination)?;

        match source {
            AssignSource::Value(source) => {
                let source = self.value(source)?;
                self.emitter
                    .call_operation(Operation::Assign, &[target, source], 1);
            }
            AssignSource::Literal(id) => {
                let literal = self
                    .program
                    .literals
                    .get(id)
                    .ok_or(SelectError::UnusableLiteral(id))?;
                let (helper, arguments) = match &literal.value {
                    LiteralValue::String(value) => {
                        let [pointer, length] = self.emitter.string(value);
                        (
                            Helper::Make(PrimitiveKind::String),
                            vec![target.clone(), pointer, length],
                        )
                    }
                    value => {
                        let raw = value.as_raw().ok_or(SelectError::UnusableLiteral(id))?;
                        (
                            Helper::Make(value.primitive()),
                            vec![target.clone(), Argument::Immediate(raw)],
                        )
                    }
                };
                self.emitter.drop_value(target);
                self.emitter.call_helper(helper, &arguments);
            }
            AssignSource::Subroutine(id) => {
                let subroutine = self
                    .program
                    .subroutines
                    .get(id)
                    .ok_or(SelectError::MissingSubroutine(id))?;
                if subroutine.is_foreign() {
                    return Err(SelectError::rejected(
                        DiagnosticKind::ForeignSubroutineAssignment,
                        format!(
                            "foreign subroutine `{}` can't be used as a value",
                            subroutine.symbol.name
                        ),
                    ));
                }
                let code = self.emitter.cx.subroutine_symbol(id)?;
                self.emitter.drop_value(target.clone());
                self.emitter
                    .call_helper(Helper::MakeFunction, &[target, Argument::Symbol(code)]);
            }
        }

        Ok(())
    }
}

fn operand_count(kind: OperatorKind) -> usize {
    match kind {
        OperatorKind::Pos
        | OperatorKind::Neg
        | OperatorKind::Not
        | OperatorKind::BitNot
        | OperatorKind::Increment
        | OperatorKind::Decrement
        | OperatorKind::Deref => 1,
        _ => 2,
    }
}

fn expect_operands(
    kind: OperatorKind,
    arguments: &[ValueId],
    count: usize,
) -> Result<(), SelectError> {
    if arguments.len() == count {
        return Ok(());
    }
    Err(SelectError::rejected(
        DiagnosticKind::WrongArgumentCount,
        format!(
            "`{}` takes {count} operand(s) but {} were given",
            kind.symbol(),
            arguments.len()
        ),
    ))
}

pub(super) fn check_argument_count(
    name: &str,
    expected: usize,
    given: usize,
) -> Result<(), SelectError> {
    let kind = match given.cmp(&expected) {
        Ordering::Equal => return Ok(()),
        Ordering::Less => DiagnosticKind::MissingArgument,
        Ordering::Greater => DiagnosticKind::WrongArgumentCount,
    };
    Err(SelectError::rejected(
        kind,
        format!("`{name}` takes {expected} argument(s) but {given} were given"),
    ))
}
