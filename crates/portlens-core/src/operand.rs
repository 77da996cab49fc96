//! Operand types for parsed machine instructions.
//!
//! Operands arrive from an assembly parser already classified into one of a
//! closed set of kinds. Every place that inspects operand kind matches on
//! [`Operand`] exhaustively, so adding a kind is a compile-checked change.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single instruction operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "kebab-case")]
pub enum Operand {
    Register(Register),
    Memory(Memory),
    Immediate(Immediate),
    /// A symbolic reference such as a branch label.
    Identifier(Identifier),
    /// A condition code (AArch64 `b.ne`, `csel ... lt`).
    Condition(Condition),
    /// A condition flag (x86 `CF`, AArch64 `nzcv`), usually hidden.
    Flag(Flag),
    /// A prefetch operation specifier (AArch64 `prfm pldl1keep`).
    Prefetch(Prefetch),
    /// A raw assembler directive parameter.
    Directive(DirectiveParameter),
}

impl Operand {
    /// Borrow the register if this operand is one.
    pub fn as_register(&self) -> Option<&Register> {
        match self {
            Operand::Register(reg) => Some(reg),
            _ => None,
        }
    }

    /// Borrow the memory reference if this operand is one.
    pub fn as_memory(&self) -> Option<&Memory> {
        match self {
            Operand::Memory(mem) => Some(mem),
            _ => None,
        }
    }

    /// Borrow the flag if this operand is one.
    pub fn as_flag(&self) -> Option<&Flag> {
        match self {
            Operand::Flag(flag) => Some(flag),
            _ => None,
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Memory(_))
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Operand::Register(_))
    }
}

impl From<Register> for Operand {
    fn from(reg: Register) -> Self {
        Operand::Register(reg)
    }
}

impl From<Memory> for Operand {
    fn from(mem: Memory) -> Self {
        Operand::Memory(mem)
    }
}

impl From<Immediate> for Operand {
    fn from(imd: Immediate) -> Self {
        Operand::Immediate(imd)
    }
}

impl From<Flag> for Operand {
    fn from(flag: Flag) -> Self {
        Operand::Flag(flag)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(reg) => write!(f, "{reg}"),
            Operand::Memory(mem) => write!(f, "{mem}"),
            Operand::Immediate(imd) => write!(f, "{imd}"),
            Operand::Identifier(id) => write!(f, "{}", id.name),
            Operand::Condition(cond) => write!(f, "{}", cond.code),
            Operand::Flag(flag) => write!(f, "{}", flag.name),
            Operand::Prefetch(prf) => write!(f, "{}", prf.operation),
            Operand::Directive(param) => write!(f, "{}", param.value),
        }
    }
}

/// An architectural register.
///
/// x86 registers carry only a name (`rax`, `xmm3`). AArch64 registers split
/// into a prefix selecting the view (`x`, `w`, `v`, `d`, ...) and a number,
/// with an optional lane shape for vector registers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Register {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Lane shape of a vector register view (`d` in `v1.2d`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lanes: Option<u32>,
}

impl Register {
    /// A register identified by name only (x86 style).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            shape: None,
            lanes: None,
        }
    }

    /// A register identified by prefix and number (AArch64 style).
    pub fn prefixed(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: Some(prefix.into()),
            shape: None,
            lanes: None,
        }
    }

    /// Attach a lane arrangement (`lanes` x `shape`).
    pub fn with_shape(mut self, lanes: u32, shape: impl Into<String>) -> Self {
        self.lanes = Some(lanes);
        self.shape = Some(shape.into());
        self
    }

    /// Prefix and name joined, e.g. `x1` or `rax`.
    pub fn full_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())?;
        if let Some(shape) = &self.shape {
            match self.lanes {
                Some(lanes) => write!(f, ".{lanes}{shape}")?,
                None => write!(f, ".{shape}")?,
            }
        }
        Ok(())
    }
}

fn default_scale() -> u32 {
    1
}

fn is_default_scale(scale: &u32) -> bool {
    *scale == 1
}

/// A memory reference `[base + index * scale + offset]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Memory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Register>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<Register>,
    #[serde(default = "default_scale", skip_serializing_if = "is_default_scale")]
    pub scale: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<Offset>,
    /// Base register is updated before the access (`[x1, #8]!`).
    #[serde(default)]
    pub pre_indexed: bool,
    /// Base register is updated after the access (`[x1], #8`).
    #[serde(default)]
    pub post_indexed: bool,
}

impl Memory {
    /// A plain `[base]` reference.
    pub fn based(base: Register) -> Self {
        Self {
            base: Some(base),
            index: None,
            scale: 1,
            offset: None,
            pre_indexed: false,
            post_indexed: false,
        }
    }

    pub fn with_index(mut self, index: Register, scale: u32) -> Self {
        self.index = Some(index);
        self.scale = scale;
        self
    }

    pub fn with_offset(mut self, offset: Offset) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn pre_indexed(mut self) -> Self {
        self.pre_indexed = true;
        self
    }

    pub fn post_indexed(mut self) -> Self {
        self.post_indexed = true;
        self
    }

    /// Whether the access implicitly writes back its base register.
    pub fn is_indexed(&self) -> bool {
        self.pre_indexed || self.post_indexed
    }

    /// Whether the offset is absent or an immediate zero.
    pub fn has_zero_offset(&self) -> bool {
        match &self.offset {
            None => true,
            Some(Offset::Immediate(imd)) => imd.value == Some(0.0),
            Some(Offset::Identifier(_)) => false,
        }
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(base) = &self.base {
            parts.push(base.to_string());
        }
        if let Some(index) = &self.index {
            if self.scale != 1 {
                parts.push(format!("{index}*{}", self.scale));
            } else {
                parts.push(index.to_string());
            }
        }
        if let (Some(offset), false) = (&self.offset, self.post_indexed) {
            parts.push(offset.to_string());
        }
        write!(f, "[{}]", parts.join(" + "))?;
        if self.pre_indexed {
            write!(f, "!")?;
        }
        if self.post_indexed {
            if let Some(offset) = &self.offset {
                write!(f, ", {offset}")?;
            }
        }
        Ok(())
    }
}

/// Displacement part of a memory reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "kebab-case")]
pub enum Offset {
    Immediate(Immediate),
    Identifier(Identifier),
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Immediate(imd) => write!(f, "{imd}"),
            Offset::Identifier(id) => write!(f, "{}", id.name),
        }
    }
}

/// Declared kind of an immediate value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImmediateKind {
    Int,
    Float,
    Double,
}

/// An immediate (literal) operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Immediate {
    #[serde(default = "ImmediateKind::default_int")]
    pub kind: ImmediateKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl ImmediateKind {
    fn default_int() -> Self {
        ImmediateKind::Int
    }
}

impl Immediate {
    pub fn int(value: i64) -> Self {
        Self {
            kind: ImmediateKind::Int,
            value: Some(value as f64),
        }
    }

    pub fn float(value: f64) -> Self {
        Self {
            kind: ImmediateKind::Float,
            value: Some(value),
        }
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.value) {
            (ImmediateKind::Int, Some(v)) => write!(f, "{}", v as i64),
            (_, Some(v)) => write!(f, "{v}"),
            (_, None) => write!(f, "?"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Condition {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Flag {
    pub name: String,
}

impl Flag {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Prefetch {
    pub operation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectiveParameter {
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_display() {
        assert_eq!(Register::new("rax").to_string(), "rax");
        assert_eq!(Register::prefixed("x", "1").to_string(), "x1");
        assert_eq!(
            Register::prefixed("v", "2").with_shape(2, "d").to_string(),
            "v2.2d"
        );
    }

    #[test]
    fn memory_display_and_indexing() {
        let mem = Memory::based(Register::new("rdi"))
            .with_index(Register::new("rax"), 8)
            .with_offset(Offset::Immediate(Immediate::int(16)));
        assert_eq!(mem.to_string(), "[rdi + rax*8 + 16]");
        assert!(!mem.is_indexed());

        let post = Memory::based(Register::prefixed("x", "1"))
            .with_offset(Offset::Immediate(Immediate::int(8)))
            .post_indexed();
        assert_eq!(post.to_string(), "[x1], 8");
        assert!(post.is_indexed());
    }

    #[test]
    fn zero_offset_detection() {
        let plain = Memory::based(Register::new("rsi"));
        assert!(plain.has_zero_offset());
        let zero = plain.clone().with_offset(Offset::Immediate(Immediate::int(0)));
        assert!(zero.has_zero_offset());
        let label = plain.with_offset(Offset::Identifier(Identifier {
            name: "table".into(),
        }));
        assert!(!label.has_zero_offset());
    }

    #[test]
    fn operand_json_shape() {
        let json = r#"[
            {"class": "register", "name": "rax"},
            {"class": "immediate", "kind": "int", "value": 1},
            {"class": "memory", "base": {"name": "rdi"}, "scale": 4,
             "index": {"name": "rcx"}}
        ]"#;
        let ops: Vec<Operand> = serde_json::from_str(json).unwrap();
        assert_eq!(ops.len(), 3);
        assert!(ops[0].is_register());
        assert_eq!(ops[1], Operand::Immediate(Immediate::int(1)));
        let mem = ops[2].as_memory().unwrap();
        assert_eq!(mem.scale, 4);
        assert_eq!(mem.index.as_ref().map(|r| r.name.as_str()), Some("rcx"));
        assert!(!mem.pre_indexed);
    }
}
