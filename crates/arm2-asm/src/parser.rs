//! Two-pass parser.
//!
//! Pass 1 builds the item stream (instructions, data directives, labels,
//! pools), counts literal-pool demand, and assigns final addresses; pool
//! reservations are rightsized from the demand counts, so a program with
//! many small pools and one large one still gets correct label addresses.
//! Pass 2 binds every operand expression against the finished symbol table,
//! leaving fully-resolved operands for the encoder.

use acorn_arm2::{Condition, HalfKind, Opcode, ShiftKind};

use crate::encoder::dp_immediate;
use crate::error::{AsmError, SourcePos};
use crate::expr::{self, Expr};
use crate::lexer::{Spanned, Token, TokenLine};
use crate::pool::{PROVISIONAL_RESERVATION, Pool};
use crate::program::DEFAULT_ORIGIN;
use crate::symbols::{SymbolKind, SymbolTable};

/// Instruction family after mnemonic decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Dp(Opcode),
    Mul { accumulate: bool },
    MulLong { signed: bool, accumulate: bool },
    Mem { load: bool, byte: bool },
    MemHalf { load: bool, kind: HalfKind },
    Block { load: bool, pre_index: bool, up: bool },
    Branch { link: bool },
    Swi,
    Mrs,
    Msr,
    Adr,
    Nop,
}

/// A shift attached to a register operand.
#[derive(Debug, Clone)]
pub struct ShiftSpec {
    pub kind: ShiftKind,
    pub by: ShiftBy,
}

/// Shift amount source.
#[derive(Debug, Clone)]
pub enum ShiftBy {
    Imm(Expr),
    Reg(u32),
    Rrx,
}

/// Offset part of an addressing mode.
#[derive(Debug, Clone)]
pub enum MemOffset {
    Imm(Expr),
    Reg {
        rm: u32,
        up: bool,
        shift: Option<(ShiftKind, Expr)>,
    },
}

/// A bracketed addressing mode.
#[derive(Debug, Clone)]
pub struct MemOperand {
    pub rn: u32,
    pub pre_index: bool,
    pub writeback: bool,
    pub offset: MemOffset,
}

/// One parsed operand.
#[derive(Debug, Clone)]
pub enum Operand {
    Reg(u32),
    /// `#expr`
    Imm(Expr),
    /// Bare expression: branch target, ADR source, PC-relative load.
    Expr(Expr),
    /// Register Operand2, optionally shifted.
    Op2Reg { rm: u32, shift: Option<ShiftSpec> },
    /// `=expr` literal load.
    LoadLiteral(Expr),
    Mem(MemOperand),
    RegList(u16),
    /// `CPSR` / `CPSR_f` in MRS/MSR.
    Psr { flags_only: bool },
    /// `!` on an LDM/STM base register.
    Writeback,
}

/// A parsed instruction, fully bound after pass 2.
#[derive(Debug, Clone)]
pub struct InstrStmt {
    pub kind: OpKind,
    pub cond: Condition,
    pub set_flags: bool,
    pub operands: Vec<Operand>,
    pub raw: String,
    pub pos: SourcePos,
}

/// Data-emitting directives.
#[derive(Debug, Clone)]
pub enum DataKind {
    Word(Vec<Expr>),
    Half(Vec<Expr>),
    Byte(Vec<Expr>),
    /// `.ascii` / `.asciz` payload, NUL already appended if requested.
    Bytes(Vec<u8>),
    Space(u32),
}

impl DataKind {
    fn size(&self) -> u32 {
        match self {
            DataKind::Word(v) => v.len() as u32 * 4,
            DataKind::Half(v) => v.len() as u32 * 2,
            DataKind::Byte(v) => v.len() as u32,
            DataKind::Bytes(b) => b.len() as u32,
            DataKind::Space(n) => *n,
        }
    }
}

/// One item of the program stream.
#[derive(Debug, Clone)]
pub enum Payload {
    Instr(InstrStmt),
    Data(DataKind),
    /// `.align` (power of two) or `.balign` (byte multiple).
    Align { alignment: u32 },
    /// `.ltorg` (or the implicit trailing pool), indexing `Module::pools`.
    Pool(usize),
    Org(u32),
    Label(String),
}

/// Item plus its resolved address.
#[derive(Debug, Clone)]
pub struct Item {
    pub payload: Payload,
    pub pos: SourcePos,
    pub addr: u32,
}

/// Parser output: the addressed item stream and supporting tables.
#[derive(Debug)]
pub struct Module {
    pub items: Vec<Item>,
    pub symbols: SymbolTable,
    pub pools: Vec<Pool>,
    pub entry: u32,
    pub warnings: Vec<String>,
}

/// Run both passes over preprocessed, macro-expanded token lines.
pub fn parse(lines: &[TokenLine]) -> Result<Module, AsmError> {
    let mut parser = Parser {
        items: Vec::new(),
        symbols: SymbolTable::new(),
        pools: Vec::new(),
        pool_items: Vec::new(),
        pending_globals: Vec::new(),
        warnings: Vec::new(),
        saw_explicit_pool: false,
    };
    for line in lines {
        parser.statement(line)?;
    }
    parser.finish()
}

struct Parser {
    items: Vec<Item>,
    symbols: SymbolTable,
    pools: Vec<Pool>,
    /// (item index, pool index) for every pool item, in order.
    pool_items: Vec<(usize, usize)>,
    pending_globals: Vec<String>,
    warnings: Vec<String>,
    saw_explicit_pool: bool,
}

impl Parser {
    // ------------------------------------------------------------------
    // Pass 1: statements to items
    // ------------------------------------------------------------------

    fn statement(&mut self, line: &TokenLine) -> Result<(), AsmError> {
        let tokens = &line.tokens;
        let mut idx = 0;

        // Leading `label:`.
        if let (Some(Spanned { tok: Token::Ident(name), pos }), Some(colon)) =
            (tokens.first(), tokens.get(1))
        {
            if colon.tok == Token::Colon {
                self.push(Payload::Label(name.clone()), pos.clone());
                idx = 2;
            }
        }
        let Some(first) = tokens.get(idx) else {
            return Ok(());
        };

        match &first.tok {
            Token::Directive(name) => self.directive(name, line, idx + 1),
            Token::Ident(mnemonic) => self.instruction(mnemonic, line, idx + 1),
            other => Err(AsmError::syntax(
                first.pos.clone(),
                format!("expected mnemonic or directive, found {}", other.describe()),
            )),
        }
    }

    fn push(&mut self, payload: Payload, pos: SourcePos) {
        self.items.push(Item {
            payload,
            pos,
            addr: 0,
        });
    }

    fn directive(&mut self, name: &str, line: &TokenLine, mut idx: usize) -> Result<(), AsmError> {
        let tokens = &line.tokens;
        let pos = tokens
            .get(idx.saturating_sub(1))
            .map_or_else(|| line.pos.clone(), |t| t.pos.clone());

        match name {
            // Section selection: addresses continue contiguously, so these
            // are bookkeeping only.
            ".text" | ".data" | ".bss" => self.expect_end(tokens, idx),
            ".org" => {
                let value = self.const_expr(tokens, &mut idx)?;
                self.expect_end(tokens, idx)?;
                self.push(Payload::Org(value as u32), pos);
                Ok(())
            }
            ".global" | ".globl" => {
                let name = expect_ident(tokens, &mut idx)?;
                self.expect_end(tokens, idx)?;
                self.pending_globals.push(name);
                Ok(())
            }
            ".equ" | ".set" => {
                let sym = expect_ident(tokens, &mut idx)?;
                expect(tokens, &mut idx, &Token::Comma)?;
                let value = self.const_expr(tokens, &mut idx)?;
                self.expect_end(tokens, idx)?;
                if name == ".set" {
                    self.symbols.set(&sym, value as u32, SymbolKind::Constant);
                } else {
                    self.symbols.define(&sym, value as u32, SymbolKind::Constant, &pos)?;
                }
                Ok(())
            }
            ".word" => {
                let exprs = self.expr_list(tokens, &mut idx)?;
                self.push(Payload::Data(DataKind::Word(exprs)), pos);
                Ok(())
            }
            ".half" => {
                let exprs = self.expr_list(tokens, &mut idx)?;
                self.push(Payload::Data(DataKind::Half(exprs)), pos);
                Ok(())
            }
            ".byte" => {
                let exprs = self.expr_list(tokens, &mut idx)?;
                self.push(Payload::Data(DataKind::Byte(exprs)), pos);
                Ok(())
            }
            ".ascii" | ".asciz" | ".string" => {
                let text = expect_string(tokens, &mut idx)?;
                self.expect_end(tokens, idx)?;
                let mut bytes = text.into_bytes();
                if name != ".ascii" {
                    bytes.push(0);
                }
                self.push(Payload::Data(DataKind::Bytes(bytes)), pos);
                Ok(())
            }
            ".space" | ".skip" => {
                let n = self.const_expr(tokens, &mut idx)?;
                self.expect_end(tokens, idx)?;
                if !(0..=0x100_0000).contains(&n) {
                    return Err(AsmError::ImmediateRange {
                        pos,
                        value: n,
                        what: "space size",
                    });
                }
                self.push(Payload::Data(DataKind::Space(n as u32)), pos);
                Ok(())
            }
            ".align" | ".balign" => {
                let n = self.const_expr(tokens, &mut idx)?;
                self.expect_end(tokens, idx)?;
                let alignment = if name == ".align" {
                    if !(0..=16).contains(&n) {
                        return Err(AsmError::ImmediateRange {
                            pos,
                            value: n,
                            what: "alignment exponent",
                        });
                    }
                    1u32 << n
                } else {
                    if n <= 0 || (n & (n - 1)) != 0 || n > 0x1_0000 {
                        return Err(AsmError::ImmediateRange {
                            pos,
                            value: n,
                            what: "alignment",
                        });
                    }
                    n as u32
                };
                self.push(Payload::Align { alignment }, pos);
                Ok(())
            }
            ".ltorg" => {
                self.expect_end(tokens, idx)?;
                let pool_idx = self.pools.len();
                self.pools.push(Pool::new());
                self.pool_items.push((self.items.len(), pool_idx));
                self.push(Payload::Pool(pool_idx), pos);
                self.saw_explicit_pool = true;
                Ok(())
            }
            other => Err(AsmError::syntax(pos, format!("unknown directive `{other}`"))),
        }
    }

    fn instruction(&mut self, mnemonic: &str, line: &TokenLine, mut idx: usize) -> Result<(), AsmError> {
        let pos = line.tokens[idx - 1].pos.clone();
        let Some(parsed) = parse_mnemonic(mnemonic) else {
            return Err(AsmError::syntax(pos, format!("unknown mnemonic `{mnemonic}`")));
        };
        if parsed.cond == Condition::Nv {
            self.warnings
                .push(format!("{pos}: NV-conditioned instruction never executes"));
        }

        let tokens = &line.tokens;
        let operands = self.operands(parsed.kind, tokens, &mut idx)?;
        self.expect_end(tokens, idx)?;

        self.push(
            Payload::Instr(InstrStmt {
                kind: parsed.kind,
                cond: parsed.cond,
                set_flags: parsed.set_flags,
                operands,
                raw: line.raw.trim().to_string(),
                pos: pos.clone(),
            }),
            pos,
        );
        Ok(())
    }

    fn operands(
        &mut self,
        kind: OpKind,
        tokens: &[Spanned],
        idx: &mut usize,
    ) -> Result<Vec<Operand>, AsmError> {
        match kind {
            OpKind::Dp(op) => {
                let mut ops = Vec::new();
                // Test ops: Rn, op2. MOV/MVN: Rd, op2. Rest: Rd, Rn, op2.
                ops.push(Operand::Reg(expect_register(tokens, idx)?));
                expect(tokens, idx, &Token::Comma)?;
                if op.uses_rn() && !op.is_test() {
                    ops.push(Operand::Reg(expect_register(tokens, idx)?));
                    expect(tokens, idx, &Token::Comma)?;
                }
                ops.push(parse_operand2(tokens, idx)?);
                Ok(ops)
            }
            OpKind::Mul { accumulate } => {
                let count = if accumulate { 4 } else { 3 };
                let mut ops = Vec::new();
                for i in 0..count {
                    if i > 0 {
                        expect(tokens, idx, &Token::Comma)?;
                    }
                    ops.push(Operand::Reg(expect_register(tokens, idx)?));
                }
                Ok(ops)
            }
            OpKind::MulLong { .. } => {
                let mut ops = Vec::new();
                for i in 0..4 {
                    if i > 0 {
                        expect(tokens, idx, &Token::Comma)?;
                    }
                    ops.push(Operand::Reg(expect_register(tokens, idx)?));
                }
                Ok(ops)
            }
            OpKind::Mem { .. } | OpKind::MemHalf { .. } => {
                let rd = expect_register(tokens, idx)?;
                expect(tokens, idx, &Token::Comma)?;
                let src = match tokens.get(*idx).map(|t| &t.tok) {
                    Some(Token::Equals) => {
                        *idx += 1;
                        Operand::LoadLiteral(expr::parse(tokens, idx)?)
                    }
                    Some(Token::LBracket) => Operand::Mem(parse_address(tokens, idx)?),
                    _ => Operand::Expr(expr::parse(tokens, idx)?),
                };
                Ok(vec![Operand::Reg(rd), src])
            }
            OpKind::Block { .. } => {
                let rn = expect_register(tokens, idx)?;
                let writeback = match tokens.get(*idx).map(|t| &t.tok) {
                    Some(Token::Bang) => {
                        *idx += 1;
                        true
                    }
                    _ => false,
                };
                expect(tokens, idx, &Token::Comma)?;
                let mask = parse_reg_list(tokens, idx)?;
                let mut ops = vec![Operand::Reg(rn), Operand::RegList(mask)];
                if writeback {
                    ops.push(Operand::Writeback);
                }
                Ok(ops)
            }
            OpKind::Branch { .. } | OpKind::Adr => {
                if matches!(kind, OpKind::Adr) {
                    let rd = expect_register(tokens, idx)?;
                    expect(tokens, idx, &Token::Comma)?;
                    let target = expr::parse(tokens, idx)?;
                    return Ok(vec![Operand::Reg(rd), Operand::Expr(target)]);
                }
                Ok(vec![Operand::Expr(expr::parse(tokens, idx)?)])
            }
            OpKind::Swi => {
                if tokens.get(*idx).map(|t| &t.tok) == Some(&Token::Hash) {
                    *idx += 1;
                }
                Ok(vec![Operand::Imm(expr::parse(tokens, idx)?)])
            }
            OpKind::Mrs => {
                let rd = expect_register(tokens, idx)?;
                expect(tokens, idx, &Token::Comma)?;
                let psr = expect_psr(tokens, idx)?;
                Ok(vec![Operand::Reg(rd), psr])
            }
            OpKind::Msr => {
                let psr = expect_psr(tokens, idx)?;
                expect(tokens, idx, &Token::Comma)?;
                let src = match tokens.get(*idx).map(|t| &t.tok) {
                    Some(Token::Register(r)) => {
                        let r = *r;
                        *idx += 1;
                        Operand::Reg(r)
                    }
                    Some(Token::Hash) => {
                        *idx += 1;
                        Operand::Imm(expr::parse(tokens, idx)?)
                    }
                    _ => {
                        return Err(AsmError::syntax(
                            position(tokens, *idx),
                            "expected register or `#imm` after CPSR",
                        ));
                    }
                };
                Ok(vec![psr, src])
            }
            OpKind::Nop => Ok(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // Pass 1 continued: addresses, pool demand, rightsizing
    // ------------------------------------------------------------------

    fn finish(mut self) -> Result<Module, AsmError> {
        // Implicit trailing pool: `LDR Rd, =x` without any `.ltorg` places
        // its literals at the end of the image.
        if !self.saw_explicit_pool {
            let pos = self
                .items
                .last()
                .map_or_else(|| SourcePos::line_start(&"<end>".into(), 0), |i| i.pos.clone());
            let pool_idx = self.pools.len();
            self.pools.push(Pool::new());
            self.pool_items.push((self.items.len(), pool_idx));
            self.push(Payload::Pool(pool_idx), pos);
        }

        let counts = self.count_pool_demand();

        // Rightsizing: the provisional 16-entry reservation per pool is
        // replaced by the counted demand, and every subsequent address
        // shifts by the accumulated delta. Walking the items with the final
        // sizes applies exactly that cumulative adjustment (and keeps
        // `.align` padding correct when a pool's delta is not a multiple of
        // the alignment).
        for (i, &count) in counts.iter().enumerate() {
            self.pools[i].reserved = count;
            if count * 4 > PROVISIONAL_RESERVATION {
                self.warnings.push(format!(
                    "literal pool {i} needs {} bytes, beyond the {PROVISIONAL_RESERVATION}-byte estimate",
                    count * 4
                ));
            }
        }

        let mut addr = DEFAULT_ORIGIN;
        for item_idx in 0..self.items.len() {
            let (payload, pos) = {
                let item = &self.items[item_idx];
                (item.payload.clone(), item.pos.clone())
            };
            match payload {
                Payload::Org(target) => {
                    addr = target;
                    self.items[item_idx].addr = target;
                }
                Payload::Align { alignment } => {
                    self.items[item_idx].addr = addr;
                    addr = addr.next_multiple_of(alignment);
                }
                Payload::Label(name) => {
                    self.items[item_idx].addr = addr;
                    self.symbols.define(&name, addr, SymbolKind::Label, &pos)?;
                }
                Payload::Pool(i) => {
                    self.items[item_idx].addr = addr;
                    self.pools[i].addr = addr;
                    addr += self.pools[i].reserved * 4;
                }
                Payload::Instr(_) => {
                    self.items[item_idx].addr = addr;
                    addr += 4;
                }
                Payload::Data(kind) => {
                    self.items[item_idx].addr = addr;
                    addr += kind.size();
                }
            }
        }

        for name in std::mem::take(&mut self.pending_globals) {
            self.symbols.mark_global(&name);
        }

        let entry = self
            .symbols
            .lookup("_start")
            .or_else(|| self.symbols.lookup("main"))
            .or_else(|| {
                self.items.iter().find_map(|i| match i.payload {
                    Payload::Instr(_) => Some(i.addr),
                    _ => None,
                })
            })
            .unwrap_or(DEFAULT_ORIGIN);

        let mut module = Module {
            items: self.items,
            symbols: self.symbols,
            pools: self.pools,
            entry,
            warnings: self.warnings,
        };
        resolve(&mut module)?;
        Ok(module)
    }

    /// Count, per pool, how many `LDR Rd, =value` will need a slot: each
    /// literal load is charged to the nearest subsequent pool (or the last
    /// pool when none follows). Loads whose constant is already known to be
    /// MOV/MVN-encodable are skipped.
    fn count_pool_demand(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.pools.len()];
        for (item_idx, item) in self.items.iter().enumerate() {
            let Payload::Instr(instr) = &item.payload else {
                continue;
            };
            let needs_pool = instr.operands.iter().any(|op| match op {
                Operand::LoadLiteral(expr) => {
                    match expr.eval(&|name| self.symbols.lookup(name).map(i64::from)) {
                        Ok(v) => {
                            let v = v as u32;
                            dp_immediate(v).is_none() && dp_immediate(!v).is_none()
                        }
                        // Unresolvable yet (forward label): assume pooled.
                        Err(_) => true,
                    }
                }
                _ => false,
            });
            if !needs_pool {
                continue;
            }
            let pool_idx = self
                .pool_items
                .iter()
                .find(|(pool_item, _)| *pool_item > item_idx)
                .map_or_else(|| self.pool_items.last().map(|(_, p)| *p), |(_, p)| Some(*p));
            if let Some(p) = pool_idx {
                counts[p] += 1;
            }
        }
        counts
    }

    // ------------------------------------------------------------------
    // Small helpers
    // ------------------------------------------------------------------

    fn const_expr(&self, tokens: &[Spanned], idx: &mut usize) -> Result<i64, AsmError> {
        let parsed = expr::parse(tokens, idx)?;
        parsed.eval(&|name| self.symbols.lookup(name).map(i64::from))
    }

    fn expr_list(&self, tokens: &[Spanned], idx: &mut usize) -> Result<Vec<Expr>, AsmError> {
        let mut exprs = vec![expr::parse(tokens, idx)?];
        while tokens.get(*idx).map(|t| &t.tok) == Some(&Token::Comma) {
            *idx += 1;
            exprs.push(expr::parse(tokens, idx)?);
        }
        self.expect_end(tokens, *idx)?;
        Ok(exprs)
    }

    fn expect_end(&self, tokens: &[Spanned], idx: usize) -> Result<(), AsmError> {
        match tokens.get(idx) {
            None => Ok(()),
            Some(t) => Err(AsmError::syntax(
                t.pos.clone(),
                format!("unexpected {}", t.tok.describe()),
            )),
        }
    }
}

// ----------------------------------------------------------------------
// Pass 2: bind operand expressions to the symbol table
// ----------------------------------------------------------------------

fn resolve(module: &mut Module) -> Result<(), AsmError> {
    let lookup = {
        // The table is read-only during binding; collect into a map the
        // closure can own.
        let mut map = std::collections::HashMap::new();
        for sym in module.symbols.iter() {
            map.insert(sym.name.clone(), i64::from(sym.value));
        }
        map
    };
    let lookup = move |name: &str| lookup.get(name).copied();

    for item in &mut module.items {
        match &mut item.payload {
            Payload::Instr(instr) => {
                for op in &mut instr.operands {
                    match op {
                        Operand::Imm(e) | Operand::Expr(e) | Operand::LoadLiteral(e) => {
                            bind(e, &lookup)?;
                        }
                        Operand::Op2Reg { shift: Some(spec), .. } => {
                            if let ShiftBy::Imm(e) = &mut spec.by {
                                bind(e, &lookup)?;
                            }
                        }
                        Operand::Mem(mem) => match &mut mem.offset {
                            MemOffset::Imm(e) => bind(e, &lookup)?,
                            MemOffset::Reg { shift: Some((_, e)), .. } => bind(e, &lookup)?,
                            MemOffset::Reg { .. } => {}
                        },
                        _ => {}
                    }
                }
            }
            Payload::Data(DataKind::Word(exprs) | DataKind::Half(exprs) | DataKind::Byte(exprs)) => {
                for e in exprs {
                    bind(e, &lookup)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn bind(e: &mut Expr, lookup: &impl Fn(&str) -> Option<i64>) -> Result<(), AsmError> {
    let value = e.eval(&|name| lookup(name))?;
    *e = Expr::Int(value);
    Ok(())
}

/// Evaluate an expression that pass 2 has already bound.
pub(crate) fn bound_value(e: &Expr) -> i64 {
    e.eval(&|_| None).unwrap_or(0)
}

// ----------------------------------------------------------------------
// Mnemonic decomposition
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Base {
    Dp(Opcode),
    Mul,
    Mla,
    Umull,
    Umlal,
    Smull,
    Smlal,
    Ldr,
    Str,
    Ldm,
    Stm,
    B,
    Bl,
    Swi,
    Mrs,
    Msr,
    Adr,
    Nop,
}

/// Longest bases first so `BLT` resolves as `B.LT`, not `BL.T`.
const BASES: &[(&str, Base)] = &[
    ("UMULL", Base::Umull),
    ("UMLAL", Base::Umlal),
    ("SMULL", Base::Smull),
    ("SMLAL", Base::Smlal),
    ("AND", Base::Dp(Opcode::And)),
    ("EOR", Base::Dp(Opcode::Eor)),
    ("SUB", Base::Dp(Opcode::Sub)),
    ("RSB", Base::Dp(Opcode::Rsb)),
    ("ADD", Base::Dp(Opcode::Add)),
    ("ADC", Base::Dp(Opcode::Adc)),
    ("SBC", Base::Dp(Opcode::Sbc)),
    ("RSC", Base::Dp(Opcode::Rsc)),
    ("TST", Base::Dp(Opcode::Tst)),
    ("TEQ", Base::Dp(Opcode::Teq)),
    ("CMP", Base::Dp(Opcode::Cmp)),
    ("CMN", Base::Dp(Opcode::Cmn)),
    ("ORR", Base::Dp(Opcode::Orr)),
    ("MOV", Base::Dp(Opcode::Mov)),
    ("BIC", Base::Dp(Opcode::Bic)),
    ("MVN", Base::Dp(Opcode::Mvn)),
    ("MUL", Base::Mul),
    ("MLA", Base::Mla),
    ("LDR", Base::Ldr),
    ("STR", Base::Str),
    ("LDM", Base::Ldm),
    ("STM", Base::Stm),
    ("SWI", Base::Swi),
    ("MRS", Base::Mrs),
    ("MSR", Base::Msr),
    ("ADR", Base::Adr),
    ("NOP", Base::Nop),
    ("BL", Base::Bl),
    ("B", Base::B),
];

/// Decomposed mnemonic.
pub struct ParsedMnemonic {
    pub kind: OpKind,
    pub cond: Condition,
    pub set_flags: bool,
}

/// Split a mnemonic into base, condition, and suffix. Returns `None` for
/// unknown mnemonics.
#[must_use]
pub fn parse_mnemonic(ident: &str) -> Option<ParsedMnemonic> {
    let upper = ident.to_ascii_uppercase();
    for (name, base) in BASES {
        let Some(rest) = upper.strip_prefix(name) else {
            continue;
        };
        // Try the whole remainder as a suffix, then a 2-char condition
        // followed by a suffix.
        if let Some(parsed) = combine(*base, Condition::Al, rest) {
            return Some(parsed);
        }
        if rest.len() >= 2 {
            if let Some(cond) = Condition::from_suffix(&rest[..2]) {
                if let Some(parsed) = combine(*base, cond, &rest[2..]) {
                    return Some(parsed);
                }
            }
        }
    }
    None
}

/// Apply a suffix to a base; `None` if the suffix is not valid there.
fn combine(base: Base, cond: Condition, suffix: &str) -> Option<ParsedMnemonic> {
    let mk = |kind, set_flags| Some(ParsedMnemonic { kind, cond, set_flags });
    match base {
        Base::Dp(op) => match suffix {
            // Test ops always set flags; a redundant S is accepted.
            "" => mk(OpKind::Dp(op), op.is_test()),
            "S" => mk(OpKind::Dp(op), true),
            _ => None,
        },
        Base::Mul => match suffix {
            "" => mk(OpKind::Mul { accumulate: false }, false),
            "S" => mk(OpKind::Mul { accumulate: false }, true),
            _ => None,
        },
        Base::Mla => match suffix {
            "" => mk(OpKind::Mul { accumulate: true }, false),
            "S" => mk(OpKind::Mul { accumulate: true }, true),
            _ => None,
        },
        Base::Umull | Base::Umlal | Base::Smull | Base::Smlal => {
            let (signed, accumulate) = match base {
                Base::Umull => (false, false),
                Base::Umlal => (false, true),
                Base::Smull => (true, false),
                _ => (true, true),
            };
            match suffix {
                "" => mk(OpKind::MulLong { signed, accumulate }, false),
                "S" => mk(OpKind::MulLong { signed, accumulate }, true),
                _ => None,
            }
        }
        Base::Ldr => match suffix {
            "" => mk(OpKind::Mem { load: true, byte: false }, false),
            "B" => mk(OpKind::Mem { load: true, byte: true }, false),
            "H" => mk(OpKind::MemHalf { load: true, kind: HalfKind::UnsignedHalf }, false),
            "SB" => mk(OpKind::MemHalf { load: true, kind: HalfKind::SignedByte }, false),
            "SH" => mk(OpKind::MemHalf { load: true, kind: HalfKind::SignedHalf }, false),
            _ => None,
        },
        Base::Str => match suffix {
            "" => mk(OpKind::Mem { load: false, byte: false }, false),
            "B" => mk(OpKind::Mem { load: false, byte: true }, false),
            "H" => mk(OpKind::MemHalf { load: false, kind: HalfKind::UnsignedHalf }, false),
            _ => None,
        },
        Base::Ldm | Base::Stm => {
            let load = matches!(base, Base::Ldm);
            let (pre_index, up) = block_mode(load, suffix)?;
            mk(OpKind::Block { load, pre_index, up }, false)
        }
        Base::B => match suffix {
            "" => mk(OpKind::Branch { link: false }, false),
            _ => None,
        },
        Base::Bl => match suffix {
            "" => mk(OpKind::Branch { link: true }, false),
            _ => None,
        },
        Base::Swi => (suffix.is_empty()).then(|| ParsedMnemonic {
            kind: OpKind::Swi,
            cond,
            set_flags: false,
        }),
        Base::Mrs => (suffix.is_empty()).then(|| ParsedMnemonic {
            kind: OpKind::Mrs,
            cond,
            set_flags: false,
        }),
        Base::Msr => (suffix.is_empty()).then(|| ParsedMnemonic {
            kind: OpKind::Msr,
            cond,
            set_flags: false,
        }),
        Base::Adr => (suffix.is_empty()).then(|| ParsedMnemonic {
            kind: OpKind::Adr,
            cond,
            set_flags: false,
        }),
        Base::Nop => (suffix.is_empty()).then(|| ParsedMnemonic {
            kind: OpKind::Nop,
            cond,
            set_flags: false,
        }),
    }
}

/// Map an LDM/STM mode suffix to (pre-index, up). The stack aliases invert
/// between load and store: a full-descending push is `STMDB`, its pop is
/// `LDMIA`.
fn block_mode(load: bool, suffix: &str) -> Option<(bool, bool)> {
    Some(match (suffix, load) {
        ("" | "IA", _) => (false, true),
        ("IB", _) => (true, true),
        ("DA", _) => (false, false),
        ("DB", _) => (true, false),
        ("FD", true) => (false, true),   // = IA
        ("FA", true) => (false, false),  // = DA
        ("ED", true) => (true, true),    // = IB
        ("EA", true) => (true, false),   // = DB
        ("FD", false) => (true, false),  // = DB
        ("FA", false) => (true, true),   // = IB
        ("ED", false) => (false, false), // = DA
        ("EA", false) => (false, true),  // = IA
        _ => return None,
    })
}

// ----------------------------------------------------------------------
// Operand-level parsing helpers
// ----------------------------------------------------------------------

fn position(tokens: &[Spanned], idx: usize) -> SourcePos {
    tokens
        .get(idx)
        .or_else(|| tokens.last())
        .map_or_else(|| SourcePos::line_start(&"<eof>".into(), 0), |t| t.pos.clone())
}

fn expect(tokens: &[Spanned], idx: &mut usize, want: &Token) -> Result<(), AsmError> {
    match tokens.get(*idx) {
        Some(t) if t.tok == *want => {
            *idx += 1;
            Ok(())
        }
        _ => Err(AsmError::syntax(
            position(tokens, *idx),
            format!("expected {}", want.describe()),
        )),
    }
}

fn expect_register(tokens: &[Spanned], idx: &mut usize) -> Result<u32, AsmError> {
    match tokens.get(*idx) {
        Some(Spanned { tok: Token::Register(r), .. }) => {
            let r = *r;
            *idx += 1;
            Ok(r)
        }
        _ => Err(AsmError::syntax(position(tokens, *idx), "expected register")),
    }
}

fn expect_ident(tokens: &[Spanned], idx: &mut usize) -> Result<String, AsmError> {
    match tokens.get(*idx) {
        Some(Spanned { tok: Token::Ident(s), .. }) => {
            let s = s.clone();
            *idx += 1;
            Ok(s)
        }
        _ => Err(AsmError::syntax(position(tokens, *idx), "expected identifier")),
    }
}

fn expect_string(tokens: &[Spanned], idx: &mut usize) -> Result<String, AsmError> {
    match tokens.get(*idx) {
        Some(Spanned { tok: Token::Str(s), .. }) => {
            let s = s.clone();
            *idx += 1;
            Ok(s)
        }
        _ => Err(AsmError::syntax(position(tokens, *idx), "expected string literal")),
    }
}

fn expect_psr(tokens: &[Spanned], idx: &mut usize) -> Result<Operand, AsmError> {
    let name = expect_ident(tokens, idx)?;
    match name.to_ascii_uppercase().as_str() {
        "CPSR" | "CPSR_ALL" => Ok(Operand::Psr { flags_only: false }),
        "CPSR_F" | "CPSR_FLG" => Ok(Operand::Psr { flags_only: true }),
        _ => Err(AsmError::syntax(
            position(tokens, *idx - 1),
            format!("expected CPSR, found `{name}`"),
        )),
    }
}

/// `#expr` or `Rm [, shift]`.
fn parse_operand2(tokens: &[Spanned], idx: &mut usize) -> Result<Operand, AsmError> {
    match tokens.get(*idx).map(|t| &t.tok) {
        Some(Token::Hash) => {
            *idx += 1;
            Ok(Operand::Imm(expr::parse(tokens, idx)?))
        }
        Some(Token::Register(rm)) => {
            let rm = *rm;
            *idx += 1;
            let shift = parse_shift(tokens, idx, true)?;
            Ok(Operand::Op2Reg { rm, shift })
        }
        _ => Err(AsmError::syntax(
            position(tokens, *idx),
            "expected `#imm` or register",
        )),
    }
}

/// `, LSL #n` / `, LSL Rs` / `, RRX` after a register, if present.
/// Register-specified amounts are only legal in Operand2 position.
fn parse_shift(
    tokens: &[Spanned],
    idx: &mut usize,
    allow_reg_amount: bool,
) -> Result<Option<ShiftSpec>, AsmError> {
    if tokens.get(*idx).map(|t| &t.tok) != Some(&Token::Comma) {
        return Ok(None);
    }
    // Only consume the comma if a shift keyword follows; the caller may own
    // the comma otherwise (operand separators).
    let Some(Spanned { tok: Token::Ident(word), pos }) = tokens.get(*idx + 1) else {
        return Ok(None);
    };
    let upper = word.to_ascii_uppercase();
    if upper == "RRX" {
        *idx += 2;
        return Ok(Some(ShiftSpec {
            kind: ShiftKind::Ror,
            by: ShiftBy::Rrx,
        }));
    }
    let kind = match upper.as_str() {
        "LSL" => ShiftKind::Lsl,
        "LSR" => ShiftKind::Lsr,
        "ASR" => ShiftKind::Asr,
        "ROR" => ShiftKind::Ror,
        _ => return Ok(None),
    };
    *idx += 2;
    match tokens.get(*idx).map(|t| &t.tok) {
        Some(Token::Hash) => {
            *idx += 1;
            Ok(Some(ShiftSpec {
                kind,
                by: ShiftBy::Imm(expr::parse(tokens, idx)?),
            }))
        }
        Some(Token::Register(rs)) if allow_reg_amount => {
            let rs = *rs;
            *idx += 1;
            Ok(Some(ShiftSpec {
                kind,
                by: ShiftBy::Reg(rs),
            }))
        }
        _ => Err(AsmError::syntax(
            pos.clone(),
            "expected `#amount` or register after shift",
        )),
    }
}

/// `[Rn]`, `[Rn], off`, `[Rn, off]`, `[Rn, off]!`, `[Rn]!`.
fn parse_address(tokens: &[Spanned], idx: &mut usize) -> Result<MemOperand, AsmError> {
    expect(tokens, idx, &Token::LBracket)?;
    let rn = expect_register(tokens, idx)?;

    match tokens.get(*idx).map(|t| &t.tok) {
        Some(Token::RBracket) => {
            *idx += 1;
            match tokens.get(*idx).map(|t| &t.tok) {
                // Post-indexed: `[Rn], offset`.
                Some(Token::Comma) => {
                    *idx += 1;
                    let offset = parse_mem_offset(tokens, idx)?;
                    Ok(MemOperand {
                        rn,
                        pre_index: false,
                        writeback: true,
                        offset,
                    })
                }
                // `[Rn]!`: pre-indexed, zero offset.
                Some(Token::Bang) => {
                    *idx += 1;
                    Ok(MemOperand {
                        rn,
                        pre_index: true,
                        writeback: true,
                        offset: MemOffset::Imm(Expr::Int(0)),
                    })
                }
                _ => Ok(MemOperand {
                    rn,
                    pre_index: true,
                    writeback: false,
                    offset: MemOffset::Imm(Expr::Int(0)),
                }),
            }
        }
        Some(Token::Comma) => {
            *idx += 1;
            let offset = parse_mem_offset(tokens, idx)?;
            expect(tokens, idx, &Token::RBracket)?;
            let writeback = if tokens.get(*idx).map(|t| &t.tok) == Some(&Token::Bang) {
                *idx += 1;
                true
            } else {
                false
            };
            Ok(MemOperand {
                rn,
                pre_index: true,
                writeback,
                offset,
            })
        }
        _ => Err(AsmError::syntax(position(tokens, *idx), "expected `]` or `,`")),
    }
}

fn parse_mem_offset(tokens: &[Spanned], idx: &mut usize) -> Result<MemOffset, AsmError> {
    match tokens.get(*idx).map(|t| &t.tok) {
        Some(Token::Hash) => {
            *idx += 1;
            Ok(MemOffset::Imm(expr::parse(tokens, idx)?))
        }
        Some(Token::Register(rm)) => {
            let rm = *rm;
            *idx += 1;
            let shift = parse_scaled_shift(tokens, idx)?;
            Ok(MemOffset::Reg { rm, up: true, shift })
        }
        Some(Token::Minus) if matches!(tokens.get(*idx + 1).map(|t| &t.tok), Some(Token::Register(_))) => {
            *idx += 1;
            let rm = expect_register(tokens, idx)?;
            let shift = parse_scaled_shift(tokens, idx)?;
            Ok(MemOffset::Reg { rm, up: false, shift })
        }
        Some(Token::Plus) if matches!(tokens.get(*idx + 1).map(|t| &t.tok), Some(Token::Register(_))) => {
            *idx += 1;
            let rm = expect_register(tokens, idx)?;
            let shift = parse_scaled_shift(tokens, idx)?;
            Ok(MemOffset::Reg { rm, up: true, shift })
        }
        // Bare numeric offset without `#` is tolerated.
        _ => Ok(MemOffset::Imm(expr::parse(tokens, idx)?)),
    }
}

fn parse_scaled_shift(
    tokens: &[Spanned],
    idx: &mut usize,
) -> Result<Option<(ShiftKind, Expr)>, AsmError> {
    match parse_shift(tokens, idx, false)? {
        None => Ok(None),
        Some(ShiftSpec { kind, by: ShiftBy::Imm(e) }) => Ok(Some((kind, e))),
        Some(ShiftSpec { by: ShiftBy::Rrx, .. }) => Ok(Some((ShiftKind::Ror, Expr::Int(0)))),
        Some(ShiftSpec { by: ShiftBy::Reg(_), .. }) => Err(AsmError::syntax(
            position(tokens, *idx),
            "register-specified shift amounts are not allowed in addresses",
        )),
    }
}

/// `{R0, R2-R5, LR}` into a 16-bit mask.
fn parse_reg_list(tokens: &[Spanned], idx: &mut usize) -> Result<u16, AsmError> {
    expect(tokens, idx, &Token::LBrace)?;
    let mut mask: u16 = 0;
    loop {
        let first = expect_register(tokens, idx)?;
        let last = if tokens.get(*idx).map(|t| &t.tok) == Some(&Token::Minus) {
            *idx += 1;
            expect_register(tokens, idx)?
        } else {
            first
        };
        if last < first {
            return Err(AsmError::syntax(
                position(tokens, *idx),
                "register range must ascend",
            ));
        }
        for r in first..=last {
            mask |= 1 << r;
        }
        match tokens.get(*idx).map(|t| &t.tok) {
            Some(Token::Comma) => {
                *idx += 1;
            }
            Some(Token::RBrace) => {
                *idx += 1;
                return Ok(mask);
            }
            _ => {
                return Err(AsmError::syntax(
                    position(tokens, *idx),
                    "expected `,` or `}` in register list",
                ));
            }
        }
    }
}
