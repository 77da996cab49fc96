//! Instruction-set identification and register aliasing rules.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::operand::{Flag, Register};

/// Supported instruction sets (and, for x86, assembly syntaxes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Isa {
    /// x86-64 in AT&T syntax (destination last, GAS size suffixes).
    X86Att,
    /// x86-64 in Intel syntax (destination first).
    X86Intel,
    #[serde(rename = "aarch64")]
    AArch64,
}

/// Position of the destination operand in the textual operand list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandOrder {
    DestinationFirst,
    DestinationLast,
}

impl Isa {
    pub fn operand_order(self) -> OperandOrder {
        match self {
            Isa::X86Att => OperandOrder::DestinationLast,
            Isa::X86Intel | Isa::AArch64 => OperandOrder::DestinationFirst,
        }
    }

    pub fn is_x86(self) -> bool {
        matches!(self, Isa::X86Att | Isa::X86Intel)
    }

    /// Strip one trailing character of `suffixes` from an AT&T mnemonic.
    ///
    /// Returns `None` for other syntaxes, for empty mnemonics, and when the
    /// last character is not one of `suffixes`.
    pub fn without_suffix<'a>(self, mnemonic: &'a str, suffixes: &str) -> Option<&'a str> {
        if self != Isa::X86Att || mnemonic.len() < 2 {
            return None;
        }
        let last = mnemonic.chars().last()?;
        if suffixes.contains(last.to_ascii_lowercase()) {
            Some(&mnemonic[..mnemonic.len() - last.len_utf8()])
        } else {
            None
        }
    }
}

impl fmt::Display for Isa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Isa::X86Att => "x86-att",
            Isa::X86Intel => "x86-intel",
            Isa::AArch64 => "aarch64",
        };
        f.write_str(name)
    }
}

/// Per-ISA register aliasing rules.
///
/// Dependency detection asks these questions instead of comparing register
/// names, since e.g. `eax` and `rax` (or `w3` and `x3`) name the same
/// physical register.
pub trait RegisterSemantics {
    /// Register class used for model lookups (`gpr`, `xmm`, `x`, `v`, ...).
    fn register_class(&self, reg: &Register) -> String;

    fn is_vector_register(&self, reg: &Register) -> bool;

    /// Whether writing `a` affects a reader of `b`.
    fn is_reg_dependent_of(&self, a: &Register, b: &Register) -> bool;

    fn is_flag_dependent_of(&self, a: &Flag, b: &Flag) -> bool {
        a.name.eq_ignore_ascii_case(&b.name)
    }
}

impl RegisterSemantics for Isa {
    fn register_class(&self, reg: &Register) -> String {
        match self {
            Isa::X86Att | Isa::X86Intel => x86::register_class(reg),
            Isa::AArch64 => aarch64::register_class(reg),
        }
    }

    fn is_vector_register(&self, reg: &Register) -> bool {
        match self {
            Isa::X86Att | Isa::X86Intel => x86::is_vector(reg),
            Isa::AArch64 => aarch64::is_vector(reg),
        }
    }

    fn is_reg_dependent_of(&self, a: &Register, b: &Register) -> bool {
        match self {
            Isa::X86Att | Isa::X86Intel => x86::aliases(a, b),
            Isa::AArch64 => aarch64::aliases(a, b),
        }
    }
}

mod x86 {
    use crate::operand::Register;

    const VECTOR_FAMILIES: [&str; 4] = ["mm", "xmm", "ymm", "zmm"];

    /// Legacy general purpose registers grouped by the physical register
    /// they name.
    const GPR_GROUPS: [&[&str]; 8] = [
        &["rax", "eax", "ax", "ah", "al"],
        &["rbx", "ebx", "bx", "bh", "bl"],
        &["rcx", "ecx", "cx", "ch", "cl"],
        &["rdx", "edx", "dx", "dh", "dl"],
        &["rsp", "esp", "sp", "spl"],
        &["rsi", "esi", "si", "sil"],
        &["rdi", "edi", "di", "dil"],
        &["rbp", "ebp", "bp", "bpl"],
    ];

    fn lower(reg: &Register) -> String {
        reg.name.trim_start_matches('%').to_ascii_lowercase()
    }

    fn gpr_group(name: &str) -> Option<usize> {
        GPR_GROUPS.iter().position(|group| group.contains(&name))
    }

    /// Number of an extended register (`r8`, `r12d`, `r15b`, ...).
    fn extended_number(name: &str) -> Option<u32> {
        let rest = name.strip_prefix('r')?;
        let digits = rest.trim_end_matches(['d', 'w', 'b']);
        if digits.is_empty() || rest.len() - digits.len() > 1 {
            return None;
        }
        digits.parse().ok()
    }

    /// Vector family and number (`ymm3` -> (`ymm`, 3)).
    fn vector_parts(name: &str) -> Option<(&str, u32)> {
        let split = name.find(|c: char| c.is_ascii_digit())?;
        let (family, number) = name.split_at(split);
        if !VECTOR_FAMILIES.contains(&family) {
            return None;
        }
        Some((family, number.parse().ok()?))
    }

    pub(super) fn is_vector(reg: &Register) -> bool {
        vector_parts(&lower(reg)).is_some()
    }

    pub(super) fn register_class(reg: &Register) -> String {
        let name = lower(reg);
        if let Some((family, _)) = vector_parts(&name) {
            return family.to_string();
        }
        if gpr_group(&name).is_some() || extended_number(&name).is_some() {
            return "gpr".to_string();
        }
        if name.len() == 2 && name.starts_with('k') && name[1..].parse::<u8>().is_ok() {
            return "k".to_string();
        }
        name
    }

    pub(super) fn aliases(a: &Register, b: &Register) -> bool {
        let (a, b) = (lower(a), lower(b));
        if a == b {
            return true;
        }
        if let (Some(ga), Some(gb)) = (gpr_group(&a), gpr_group(&b)) {
            return ga == gb;
        }
        if let (Some(na), Some(nb)) = (extended_number(&a), extended_number(&b)) {
            return na == nb;
        }
        // xmm1, ymm1 and zmm1 overlap; mm registers are separate (x87 stack).
        match (vector_parts(&a), vector_parts(&b)) {
            (Some((fa, na)), Some((fb, nb))) => na == nb && fa != "mm" && fb != "mm",
            _ => false,
        }
    }
}

mod aarch64 {
    use crate::operand::Register;

    const GPR_PREFIXES: &str = "wx";
    const VECTOR_PREFIXES: &str = "bhsdqvz";

    fn prefix_char(reg: &Register) -> Option<char> {
        let prefix = reg.prefix.as_deref()?;
        let mut chars = prefix.chars();
        let c = chars.next()?.to_ascii_lowercase();
        chars.next().is_none().then_some(c)
    }

    pub(super) fn is_vector(reg: &Register) -> bool {
        prefix_char(reg).is_some_and(|c| VECTOR_PREFIXES.contains(c))
    }

    pub(super) fn register_class(reg: &Register) -> String {
        match &reg.prefix {
            Some(prefix) => prefix.to_ascii_lowercase(),
            None => reg.name.to_ascii_lowercase(),
        }
    }

    pub(super) fn aliases(a: &Register, b: &Register) -> bool {
        if !a.name.eq_ignore_ascii_case(&b.name) {
            return false;
        }
        match (prefix_char(a), prefix_char(b)) {
            (Some(pa), Some(pb)) => {
                pa == pb
                    || (GPR_PREFIXES.contains(pa) && GPR_PREFIXES.contains(pb))
                    || (VECTOR_PREFIXES.contains(pa) && VECTOR_PREFIXES.contains(pb))
            }
            (None, None) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(name: &str) -> Register {
        Register::new(name)
    }

    fn a(prefix: &str, name: &str) -> Register {
        Register::prefixed(prefix, name)
    }

    #[test]
    fn att_suffix_stripping() {
        assert_eq!(Isa::X86Att.without_suffix("addq", "bswlqt"), Some("add"));
        assert_eq!(Isa::X86Att.without_suffix("add", "bwlq"), None);
        assert_eq!(Isa::X86Intel.without_suffix("addq", "bswlqt"), None);
        assert_eq!(Isa::X86Att.without_suffix("q", "bswlqt"), None);
    }

    #[test]
    fn operand_order_by_isa() {
        assert_eq!(Isa::X86Att.operand_order(), OperandOrder::DestinationLast);
        assert_eq!(Isa::X86Intel.operand_order(), OperandOrder::DestinationFirst);
        assert_eq!(Isa::AArch64.operand_order(), OperandOrder::DestinationFirst);
    }

    #[test]
    fn x86_gpr_aliasing() {
        let isa = Isa::X86Att;
        assert!(isa.is_reg_dependent_of(&r("rax"), &r("eax")));
        assert!(isa.is_reg_dependent_of(&r("al"), &r("RAX")));
        assert!(!isa.is_reg_dependent_of(&r("rax"), &r("rbx")));
        assert!(isa.is_reg_dependent_of(&r("r8"), &r("r8d")));
        assert!(!isa.is_reg_dependent_of(&r("r8"), &r("r9")));
        assert!(!isa.is_reg_dependent_of(&r("rsi"), &r("rdi")));
    }

    #[test]
    fn x86_vector_aliasing() {
        let isa = Isa::X86Intel;
        assert!(isa.is_reg_dependent_of(&r("xmm1"), &r("ymm1")));
        assert!(isa.is_reg_dependent_of(&r("zmm1"), &r("xmm1")));
        assert!(!isa.is_reg_dependent_of(&r("xmm1"), &r("xmm2")));
        assert!(!isa.is_reg_dependent_of(&r("mm1"), &r("xmm1")));
    }

    #[test]
    fn x86_register_classes() {
        let isa = Isa::X86Att;
        assert_eq!(isa.register_class(&r("rax")), "gpr");
        assert_eq!(isa.register_class(&r("r11d")), "gpr");
        assert_eq!(isa.register_class(&r("ymm7")), "ymm");
        assert_eq!(isa.register_class(&r("k1")), "k");
        assert_eq!(isa.register_class(&r("rip")), "rip");
        assert!(isa.is_vector_register(&r("xmm0")));
        assert!(!isa.is_vector_register(&r("rax")));
    }

    #[test]
    fn aarch64_aliasing() {
        let isa = Isa::AArch64;
        assert!(isa.is_reg_dependent_of(&a("x", "1"), &a("w", "1")));
        assert!(isa.is_reg_dependent_of(&a("v", "3"), &a("d", "3")));
        assert!(!isa.is_reg_dependent_of(&a("x", "3"), &a("d", "3")));
        assert!(!isa.is_reg_dependent_of(&a("x", "1"), &a("x", "2")));
        assert_eq!(isa.register_class(&a("q", "0")), "q");
        assert!(isa.is_vector_register(&a("q", "0")));
        assert!(!isa.is_vector_register(&a("x", "0")));
    }

    #[test]
    fn flag_aliasing_by_name() {
        let isa = Isa::X86Att;
        assert!(isa.is_flag_dependent_of(&Flag::new("CF"), &Flag::new("cf")));
        assert!(!isa.is_flag_dependent_of(&Flag::new("CF"), &Flag::new("ZF")));
    }

    #[test]
    fn isa_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            isa: Isa,
        }
        let w: Wrapper = serde_json::from_str(r#"{"isa": "aarch64"}"#).unwrap();
        assert_eq!(w.isa, Isa::AArch64);
        let w: Wrapper = serde_json::from_str(r#"{"isa": "x86-att"}"#).unwrap();
        assert_eq!(w.isa, Isa::X86Att);
        assert_eq!(Isa::X86Intel.to_string(), "x86-intel");
    }
}
