//! Human-readable listings of generated method bodies.

use std::fmt::Write;

use sable_symbols::{ClassId, FieldId, MethodId, Symbol, SymbolLookup, TypeId};

use crate::body::{MethodBody, RegionKind};
use crate::error::EmitError;
use crate::opcodes::{Instruction, OpCode, Operand, OperandKind};

/// Names the tokens embedded in instructions.
pub trait TokenResolver {
    fn method_name(&self, token: u32) -> String;
    fn field_name(&self, token: u32) -> String;
    fn type_name(&self, token: u32) -> String;
    fn class_name(&self, class: ClassId) -> String;
    fn string(&self, token: u32) -> Option<Symbol>;
}

/// Resolves tokens against declared symbols and a module string pool.
pub struct SymbolResolver<'a, L: SymbolLookup> {
    pub symbols: &'a L,
    pub strings: &'a [Symbol],
}

impl<L: SymbolLookup> TokenResolver for SymbolResolver<'_, L> {
    fn method_name(&self, token: u32) -> String {
        let method = self.symbols.method(MethodId(token));
        let params: Vec<String> = method.params.iter().map(|p| self.symbols.type_name(p.ty)).collect();
        format!(
            "{}::{}({})",
            self.symbols.class_name(method.containing),
            method.name,
            params.join(", ")
        )
    }

    fn field_name(&self, token: u32) -> String {
        let field = self.symbols.field(FieldId(token));
        format!("{}::{}", self.symbols.class_name(field.containing), field.name)
    }

    fn type_name(&self, token: u32) -> String {
        self.symbols.type_name(TypeId(token))
    }

    fn class_name(&self, class: ClassId) -> String {
        self.symbols.class_name(class)
    }

    fn string(&self, token: u32) -> Option<Symbol> {
        self.strings.get(token as usize).cloned()
    }
}

/// Disassemble a method body.
pub fn disassemble(name: &str, body: &MethodBody, resolver: &dyn TokenResolver) -> Result<String, EmitError> {
    let mut output = format!("== {} ==\n", name);
    let _ = writeln!(output, ".maxstack {}", body.max_stack);
    if !body.locals.is_empty() {
        let locals: Vec<String> = body
            .locals
            .iter()
            .enumerate()
            .map(|(i, local)| {
                let ty = resolver.type_name(local.ty.0);
                match &local.name {
                    Some(name) => format!("[{}] {} {}", i, ty, name),
                    None => format!("[{}] {}", i, ty),
                }
            })
            .collect();
        let _ = writeln!(output, ".locals ({})", locals.join(", "));
    }

    let mut points = body.sequence_points.iter().peekable();
    let mut offset = 0;
    while offset < body.code.len() {
        let (instruction, next) = Instruction::decode(&body.code, offset)?;
        let marker = match points.peek() {
            Some(point) if point.offset as usize == offset => {
                points.next();
                "*"
            }
            _ => " ",
        };
        let _ = writeln!(output, "{}IL_{:04x}  {}", marker, offset, format_instruction(&instruction, resolver));
        offset = next;
    }

    for region in &body.regions {
        let handler = match region.kind {
            RegionKind::Catch(ty) => format!("catch {}", resolver.type_name(ty.0)),
            RegionKind::Finally => "finally".to_string(),
        };
        let _ = writeln!(
            output,
            ".try IL_{:04x} to IL_{:04x} {} IL_{:04x} to IL_{:04x}",
            region.try_start, region.try_end, handler, region.handler_start, region.handler_end
        );
    }

    if let Some(machine) = &body.state_machine {
        if let Some(class) = machine.state_machine {
            let _ = writeln!(output, ".statemachine {}", resolver.class_name(class));
        }
        for offset in &machine.yield_offsets {
            let _ = writeln!(output, ".yield IL_{:04x}", offset);
        }
        for offset in &machine.resume_offsets {
            let _ = writeln!(output, ".resume IL_{:04x}", offset);
        }
        if let Some(handler) = machine.async_catch_handler {
            let _ = writeln!(output, ".asynccatch IL_{:04x}", handler);
        }
    }
    Ok(output)
}

fn format_instruction(instruction: &Instruction, resolver: &dyn TokenResolver) -> String {
    let name = instruction.op.name();
    let operand = match (&instruction.operand, instruction.op.operand_kind()) {
        (Operand::None, _) => return name.to_string(),
        (Operand::Int32(v), _) => v.to_string(),
        (Operand::Int64(v), _) => v.to_string(),
        (Operand::Float32(v), _) => format!("{:?}", v),
        (Operand::Float64(v), _) => format!("{:?}", v),
        (Operand::Index(v), _) => v.to_string(),
        (Operand::Token(t), OperandKind::Method) => resolver.method_name(*t),
        (Operand::Token(t), OperandKind::Field) => resolver.field_name(*t),
        (Operand::Token(t), OperandKind::Type) => resolver.type_name(*t),
        (Operand::Token(t), OperandKind::String) => match resolver.string(*t) {
            Some(text) => format!("{:?}", &*text),
            None => format!("<string {}>", t),
        },
        (Operand::Token(t), _) => t.to_string(),
        (Operand::Target(target), _) => format!("IL_{:04x}", target),
        (Operand::Targets(targets), _) => {
            let targets: Vec<String> = targets.iter().map(|t| format!("IL_{:04x}", t)).collect();
            format!("({})", targets.join(", "))
        }
        (Operand::Label(label), _) => format!("L{}", label.0),
        (Operand::Labels(labels), _) => {
            let labels: Vec<String> = labels.iter().map(|l| format!("L{}", l.0)).collect();
            format!("({})", labels.join(", "))
        }
    };
    if instruction.op == OpCode::Invokedelegate {
        return format!("{:12} {} args", name, operand);
    }
    format!("{:12} {}", name, operand)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{ExceptionRegion, LocalSlot, SequencePoint};
    use crate::builder::ILBuilder;
    use sable_symbols::SymbolTable;

    #[test]
    fn test_disassemble_listing() {
        let table = SymbolTable::new();
        let strings: Vec<Symbol> = vec![Symbol::from("hello")];
        let write_line = table
            .find_methods(ClassId::CONSOLE, "WriteLine")
            .into_iter()
            .find(|&m| table.method(m).params.first().is_some_and(|p| p.ty == TypeId::STRING))
            .unwrap();

        let mut il = ILBuilder::new();
        let slot = il.allocate_local(Some("x".into()), TypeId::INT, false).unwrap();
        il.emit(OpCode::Ldstr, Operand::Token(0));
        il.emit_with_effect(OpCode::Call, Operand::Token(write_line.0), -1);
        il.emit(OpCode::LdcI4, Operand::Int32(7));
        il.emit(OpCode::Stloc, Operand::Index(slot));
        il.emit_with_effect(OpCode::Ret, Operand::None, 0);
        let realized = il.realize().unwrap();
        let body = MethodBody {
            code: realized.code,
            max_stack: realized.max_stack,
            locals: realized.locals,
            sequence_points: vec![SequencePoint {
                offset: 0,
                start: 0,
                end: 5,
                file_id: 0,
            }],
            regions: vec![ExceptionRegion {
                kind: RegionKind::Finally,
                try_start: 0,
                try_end: 10,
                handler_start: 10,
                handler_end: 13,
            }],
            state_machine: None,
        };

        let resolver = SymbolResolver {
            symbols: &table,
            strings: &strings,
        };
        let listing = disassemble("Program.Main()", &body, &resolver).unwrap();
        assert!(listing.starts_with("== Program.Main() ==\n.maxstack 1\n"));
        assert!(listing.contains(".locals ([0] int x)"));
        assert!(listing.contains("*IL_0000  ldstr        \"hello\""));
        assert!(listing.contains("call         Console::WriteLine(string)"));
        assert!(listing.contains("ldc.i4       7"));
        assert!(listing.contains(".try IL_0000 to IL_000a finally IL_000a to IL_000d"));
        assert_eq!(body.locals[0], LocalSlot { name: Some("x".into()), ty: TypeId::INT });
    }

    #[test]
    fn test_disassemble_reports_corrupt_code() {
        let table = SymbolTable::new();
        let body = MethodBody {
            code: vec![0xEE],
            max_stack: 0,
            locals: Vec::new(),
            sequence_points: Vec::new(),
            regions: Vec::new(),
            state_machine: None,
        };
        let resolver = SymbolResolver {
            symbols: &table,
            strings: &[],
        };
        assert!(disassemble("bad", &body, &resolver).is_err());
    }
}
