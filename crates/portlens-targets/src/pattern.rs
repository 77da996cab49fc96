//! Operand patterns used by model entries and the rules for matching them
//! against concrete operands.

use std::collections::HashMap;

use portlens_core::{ImmediateKind, Memory, Offset, Operand, Register, RegisterSemantics};
use serde::{Deserialize, Serialize};

/// Wildcard accepted for memory pattern components.
pub const WILDCARD: &str = "*";

/// Mnemonic(s) an entry applies to. A list is expanded into one entry per
/// mnemonic when a model is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Mnemonics {
    One(String),
    Many(Vec<String>),
}

impl Mnemonics {
    pub fn names(&self) -> Vec<String> {
        match self {
            Mnemonics::One(name) => vec![name.clone()],
            Mnemonics::Many(names) => names.clone(),
        }
    }
}

/// Case-insensitive mnemonic -> entry positions.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct MnemonicIndex(HashMap<String, Vec<usize>>);

impl MnemonicIndex {
    pub(crate) fn insert(&mut self, mnemonic: &str, position: usize) {
        self.0
            .entry(mnemonic.to_ascii_lowercase())
            .or_default()
            .push(position);
    }

    pub(crate) fn get(&self, mnemonic: &str) -> &[usize] {
        self.0
            .get(&mnemonic.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Pattern for one operand position of a model entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "kebab-case")]
pub enum OperandPattern {
    Register(RegisterPattern),
    Memory(MemoryPattern),
    Immediate(ImmediatePattern),
    Identifier,
    Condition,
    Flag(FlagPattern),
    #[serde(rename = "prfop")]
    Prefetch,
}

/// Register pattern. x86 models name the register class (`gpr`, `xmm`);
/// AArch64 models give the prefix and optionally the lane shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegisterPattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
}

/// Scale component of a memory pattern: a fixed factor or `"*"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalePattern {
    Factor(u32),
    Wildcard(String),
}

impl Default for ScalePattern {
    fn default() -> Self {
        ScalePattern::Factor(1)
    }
}

/// Memory addressing-mode pattern.
///
/// `base`, `index`: absent means no register, `"*"` any, otherwise a
/// register class. `offset`: absent means none (or zero), `"*"` any,
/// `"imd"` an immediate, `"identifier"` a symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MemoryPattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default)]
    pub scale: ScalePattern,
    #[serde(default)]
    pub pre_indexed: bool,
    #[serde(default)]
    pub post_indexed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmediatePattern {
    /// Declared kind; absent matches any immediate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imd: Option<ImmediateKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagPattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// An operand as presented to a model lookup.
#[derive(Debug, Clone, Copy)]
pub enum OperandQuery<'a> {
    Concrete(&'a Operand),
    /// Matches any register pattern. Used when retrying a lookup with
    /// memory operands replaced by registers.
    AnyRegister,
}

impl<'a> OperandQuery<'a> {
    /// Queries for `operands`, with memory operands turned into
    /// [`OperandQuery::AnyRegister`] when `memory_as_register` is set.
    pub fn for_operands(operands: &'a [Operand], memory_as_register: bool) -> Vec<Self> {
        operands
            .iter()
            .map(|op| match op {
                Operand::Memory(_) if memory_as_register => OperandQuery::AnyRegister,
                other => OperandQuery::Concrete(other),
            })
            .collect()
    }
}

impl OperandPattern {
    pub fn matches(&self, query: &OperandQuery<'_>, rules: &dyn RegisterSemantics) -> bool {
        let operand = match query {
            OperandQuery::AnyRegister => return matches!(self, OperandPattern::Register(_)),
            OperandQuery::Concrete(op) => *op,
        };
        match (self, operand) {
            (OperandPattern::Register(pat), Operand::Register(reg)) => pat.matches(reg, rules),
            (OperandPattern::Memory(pat), Operand::Memory(mem)) => pat.matches(mem, rules),
            (OperandPattern::Immediate(pat), Operand::Immediate(imd)) => {
                pat.imd.map_or(true, |kind| kind == imd.kind)
            }
            (OperandPattern::Identifier, Operand::Identifier(_)) => true,
            (OperandPattern::Condition, Operand::Condition(_)) => true,
            (OperandPattern::Flag(pat), Operand::Flag(flag)) => pat
                .name
                .as_deref()
                .map_or(true, |name| name.eq_ignore_ascii_case(&flag.name)),
            (OperandPattern::Prefetch, Operand::Prefetch(_)) => true,
            _ => false,
        }
    }

    /// Whether every pattern matches the query at the same position.
    pub fn all_match(
        patterns: &[OperandPattern],
        queries: &[OperandQuery<'_>],
        rules: &dyn RegisterSemantics,
    ) -> bool {
        patterns.len() == queries.len()
            && patterns
                .iter()
                .zip(queries)
                .all(|(pat, query)| pat.matches(query, rules))
    }
}

fn eq_opt(pattern: &Option<String>, actual: &Option<String>) -> bool {
    match (pattern, actual) {
        (None, _) => true,
        (Some(p), Some(a)) => p.eq_ignore_ascii_case(a),
        (Some(_), None) => false,
    }
}

impl RegisterPattern {
    pub fn matches(&self, reg: &Register, rules: &dyn RegisterSemantics) -> bool {
        if !eq_opt(&self.prefix, &reg.prefix) || !eq_opt(&self.shape, &reg.shape) {
            return false;
        }
        match &self.name {
            Some(name) => name.eq_ignore_ascii_case(&rules.register_class(reg)),
            None => true,
        }
    }
}

fn register_slot_matches(
    pattern: &Option<String>,
    reg: &Option<Register>,
    rules: &dyn RegisterSemantics,
) -> bool {
    match (pattern.as_deref(), reg) {
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => pattern.as_deref() == Some(WILDCARD),
        (Some(WILDCARD), Some(_)) => true,
        (Some(class), Some(reg)) => class.eq_ignore_ascii_case(&rules.register_class(reg)),
    }
}

impl MemoryPattern {
    pub fn matches(&self, mem: &Memory, rules: &dyn RegisterSemantics) -> bool {
        register_slot_matches(&self.base, &mem.base, rules)
            && register_slot_matches(&self.index, &mem.index, rules)
            && self.offset_matches(mem)
            && self.scale_matches(mem.scale)
            && self.pre_indexed == mem.pre_indexed
            && self.post_indexed == mem.post_indexed
    }

    fn offset_matches(&self, mem: &Memory) -> bool {
        match self.offset.as_deref() {
            None => mem.has_zero_offset(),
            Some(WILDCARD) => true,
            Some("imd") => matches!(mem.offset, Some(Offset::Immediate(_))),
            Some("identifier") | Some("id") => matches!(mem.offset, Some(Offset::Identifier(_))),
            Some(_) => false,
        }
    }

    fn scale_matches(&self, scale: u32) -> bool {
        match &self.scale {
            ScalePattern::Wildcard(_) => true,
            ScalePattern::Factor(factor) => *factor == scale || (*factor != 1 && scale != 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portlens_core::{Flag, Identifier, Immediate, Isa};

    fn mem_pattern(base: Option<&str>, offset: Option<&str>, index: Option<&str>) -> MemoryPattern {
        MemoryPattern {
            base: base.map(Into::into),
            offset: offset.map(Into::into),
            index: index.map(Into::into),
            ..MemoryPattern::default()
        }
    }

    #[test]
    fn x86_register_class_pattern() {
        let gpr = OperandPattern::Register(RegisterPattern {
            name: Some("gpr".into()),
            ..RegisterPattern::default()
        });
        let rax = Operand::Register(Register::new("rax"));
        let xmm = Operand::Register(Register::new("xmm0"));
        assert!(gpr.matches(&OperandQuery::Concrete(&rax), &Isa::X86Att));
        assert!(!gpr.matches(&OperandQuery::Concrete(&xmm), &Isa::X86Att));
        assert!(gpr.matches(&OperandQuery::AnyRegister, &Isa::X86Att));
    }

    #[test]
    fn aarch64_prefix_and_shape_pattern() {
        let pat = RegisterPattern {
            prefix: Some("v".into()),
            shape: Some("d".into()),
            ..RegisterPattern::default()
        };
        let v = Register::prefixed("v", "1").with_shape(2, "d");
        let v_s = Register::prefixed("v", "1").with_shape(4, "s");
        let x = Register::prefixed("x", "1");
        assert!(pat.matches(&v, &Isa::AArch64));
        assert!(!pat.matches(&v_s, &Isa::AArch64));
        assert!(!pat.matches(&x, &Isa::AArch64));
    }

    #[test]
    fn memory_base_and_offset() {
        let rdi = Register::new("rdi");
        let plain = Memory::based(rdi.clone());
        let zero = Memory::based(rdi.clone()).with_offset(Offset::Immediate(Immediate::int(0)));
        let disp = Memory::based(rdi.clone()).with_offset(Offset::Immediate(Immediate::int(8)));
        let sym = Memory::based(rdi).with_offset(Offset::Identifier(Identifier {
            name: "tbl".into(),
        }));

        let no_offset = mem_pattern(Some("gpr"), None, None);
        assert!(no_offset.matches(&plain, &Isa::X86Att));
        assert!(no_offset.matches(&zero, &Isa::X86Att));
        assert!(!no_offset.matches(&disp, &Isa::X86Att));

        let imd = mem_pattern(Some("gpr"), Some("imd"), None);
        assert!(imd.matches(&disp, &Isa::X86Att));
        assert!(!imd.matches(&sym, &Isa::X86Att));
        assert!(mem_pattern(Some("gpr"), Some("id"), None).matches(&sym, &Isa::X86Att));
        assert!(mem_pattern(Some("*"), Some("*"), None).matches(&sym, &Isa::X86Att));
    }

    #[test]
    fn memory_index_and_scale() {
        let mem = Memory::based(Register::new("rdi")).with_index(Register::new("rax"), 8);
        let mut pat = mem_pattern(Some("gpr"), None, Some("gpr"));
        pat.scale = ScalePattern::Factor(4);
        // Both non-unit scales are interchangeable.
        assert!(pat.matches(&mem, &Isa::X86Att));
        pat.scale = ScalePattern::Factor(1);
        assert!(!pat.matches(&mem, &Isa::X86Att));
        pat.scale = ScalePattern::Wildcard("*".into());
        assert!(pat.matches(&mem, &Isa::X86Att));
        assert!(!mem_pattern(Some("gpr"), None, None).matches(&mem, &Isa::X86Att));
    }

    #[test]
    fn memory_indexing_flags_must_agree() {
        let post = Memory::based(Register::prefixed("x", "1"))
            .with_offset(Offset::Immediate(Immediate::int(16)))
            .post_indexed();
        let mut pat = mem_pattern(Some("x"), Some("imd"), None);
        assert!(!pat.matches(&post, &Isa::AArch64));
        pat.post_indexed = true;
        assert!(pat.matches(&post, &Isa::AArch64));
    }

    #[test]
    fn immediate_and_flag_patterns() {
        let int = Operand::Immediate(Immediate::int(3));
        let float = Operand::Immediate(Immediate::float(1.5));
        let int_pat = OperandPattern::Immediate(ImmediatePattern {
            imd: Some(ImmediateKind::Int),
        });
        assert!(int_pat.matches(&OperandQuery::Concrete(&int), &Isa::X86Att));
        assert!(!int_pat.matches(&OperandQuery::Concrete(&float), &Isa::X86Att));
        assert!(!int_pat.matches(&OperandQuery::AnyRegister, &Isa::X86Att));

        let cf = Operand::Flag(Flag::new("CF"));
        let any_flag = OperandPattern::Flag(FlagPattern::default());
        let zf = OperandPattern::Flag(FlagPattern {
            name: Some("ZF".into()),
        });
        assert!(any_flag.matches(&OperandQuery::Concrete(&cf), &Isa::X86Att));
        assert!(!zf.matches(&OperandQuery::Concrete(&cf), &Isa::X86Att));
    }

    #[test]
    fn queries_replace_memory() {
        let ops = vec![
            Operand::Memory(Memory::based(Register::new("rsi"))),
            Operand::Register(Register::new("rax")),
        ];
        let queries = OperandQuery::for_operands(&ops, true);
        assert!(matches!(queries[0], OperandQuery::AnyRegister));
        assert!(matches!(queries[1], OperandQuery::Concrete(_)));
        let gpr = OperandPattern::Register(RegisterPattern {
            name: Some("gpr".into()),
            ..RegisterPattern::default()
        });
        assert!(OperandPattern::all_match(
            &[gpr.clone(), gpr.clone()],
            &queries,
            &Isa::X86Att
        ));
        assert!(!OperandPattern::all_match(&[gpr], &queries, &Isa::X86Att));
    }

    #[test]
    fn patterns_parse_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            operands: Vec<OperandPattern>,
        }
        let w: Wrapper = toml::from_str(
            r#"
operands = [
    { class = "memory", base = "gpr", offset = "*", index = "gpr", scale = "*" },
    { class = "register", prefix = "v", shape = "d" },
    { class = "immediate", imd = "int" },
    { class = "prfop" },
]
"#,
        )
        .unwrap();
        assert_eq!(w.operands.len(), 4);
        match &w.operands[0] {
            OperandPattern::Memory(m) => {
                assert_eq!(m.scale, ScalePattern::Wildcard("*".into()));
                assert!(!m.pre_indexed);
            }
            other => panic!("expected memory pattern, got {other:?}"),
        }
        assert_eq!(w.operands[3], OperandPattern::Prefetch);
    }
}
