//! ISA role model.
//!
//! Declares, per mnemonic and operand signature, which operands an
//! instruction reads and writes, the implicit operands it touches, and
//! whether equal operands break the dependency (`xor %eax, %eax`).

use portlens_core::{Isa, Operand};
use serde::{Deserialize, Serialize};

use crate::pattern::{Mnemonics, MnemonicIndex, OperandPattern, OperandQuery};

/// Role of an operand position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandRole {
    Source,
    Destination,
    SourceDestination,
}

fn role_of(source: bool, destination: bool) -> Option<OperandRole> {
    match (source, destination) {
        (true, true) => Some(OperandRole::SourceDestination),
        (true, false) => Some(OperandRole::Source),
        (false, true) => Some(OperandRole::Destination),
        (false, false) => None,
    }
}

/// An explicit operand position of an ISA entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsaOperand {
    #[serde(flatten)]
    pub pattern: OperandPattern,
    #[serde(default)]
    pub source: bool,
    #[serde(default)]
    pub destination: bool,
}

impl IsaOperand {
    pub fn role(&self) -> Option<OperandRole> {
        role_of(self.source, self.destination)
    }
}

/// An implicit operand (flags, fixed registers) of an ISA entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiddenOperand {
    #[serde(flatten)]
    pub operand: Operand,
    #[serde(default)]
    pub source: bool,
    #[serde(default)]
    pub destination: bool,
}

impl HiddenOperand {
    pub fn role(&self) -> Option<OperandRole> {
        role_of(self.source, self.destination)
    }
}

/// One entry of the ISA role model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IsaEntry {
    pub name: String,
    #[serde(default)]
    pub operands: Vec<IsaOperand>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hidden_operands: Vec<HiddenOperand>,
    /// All operands are write-only when they are pairwise equal.
    #[serde(default)]
    pub breaks_dependency_on_equal_operands: bool,
}

impl IsaEntry {
    pub fn patterns(&self) -> Vec<OperandPattern> {
        self.operands.iter().map(|op| op.pattern.clone()).collect()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct IsaEntryDef {
    name: Mnemonics,
    #[serde(default)]
    operands: Vec<IsaOperand>,
    #[serde(default)]
    hidden_operands: Vec<HiddenOperand>,
    #[serde(default)]
    breaks_dependency_on_equal_operands: bool,
}

#[derive(Deserialize)]
struct IsaModelDef {
    isa: Isa,
    #[serde(default, rename = "instruction")]
    entries: Vec<IsaEntryDef>,
}

/// Operand-role database for one instruction set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "IsaModelDef")]
pub struct IsaModel {
    pub isa: Isa,
    #[serde(rename = "instruction")]
    entries: Vec<IsaEntry>,
    #[serde(skip)]
    index: MnemonicIndex,
}

impl From<IsaModelDef> for IsaModel {
    fn from(def: IsaModelDef) -> Self {
        let mut model = IsaModel::new(def.isa);
        for entry in def.entries {
            for name in entry.name.names() {
                model.add_entry(IsaEntry {
                    name,
                    operands: entry.operands.clone(),
                    hidden_operands: entry.hidden_operands.clone(),
                    breaks_dependency_on_equal_operands: entry.breaks_dependency_on_equal_operands,
                });
            }
        }
        model
    }
}

impl IsaModel {
    pub fn new(isa: Isa) -> Self {
        Self {
            isa,
            entries: Vec::new(),
            index: MnemonicIndex::default(),
        }
    }

    pub fn entries(&self) -> &[IsaEntry] {
        &self.entries
    }

    pub fn add_entry(&mut self, entry: IsaEntry) {
        self.index.insert(&entry.name, self.entries.len());
        self.entries.push(entry);
    }

    /// Find the entry for `name` whose operand patterns match `queries`.
    ///
    /// Several matches indicate a data-quality problem in the model; the
    /// first one is used.
    pub fn get_entry(&self, name: &str, queries: &[OperandQuery<'_>]) -> Option<&IsaEntry> {
        let mut found = self.index.get(name).iter().map(|&i| &self.entries[i]).filter(|e| {
            e.operands.len() == queries.len()
                && e.operands
                    .iter()
                    .zip(queries)
                    .all(|(op, q)| op.pattern.matches(q, &self.isa))
        });
        let first = found.next()?;
        if found.next().is_some() {
            tracing::warn!(
                mnemonic = name,
                "multiple ISA entries match; using the first"
            );
        }
        Some(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portlens_core::{Memory, Register};

    const ISA_TOML: &str = r#"
isa = "x86-att"

[[instruction]]
name = ["add", "sub"]
operands = [
    { class = "register", name = "gpr", source = true },
    { class = "register", name = "gpr", source = true, destination = true },
]
hidden-operands = [{ class = "flag", name = "CF", destination = true }]

[[instruction]]
name = "xor"
breaks-dependency-on-equal-operands = true
operands = [
    { class = "register", name = "gpr", source = true },
    { class = "register", name = "gpr", source = true, destination = true },
]
"#;

    fn model() -> IsaModel {
        toml::from_str(ISA_TOML).unwrap()
    }

    #[test]
    fn alias_list_expands_to_entries() {
        let m = model();
        assert_eq!(m.entries().len(), 3);
        assert_eq!(m.entries()[1].name, "sub");
        assert_eq!(m.entries()[1].hidden_operands.len(), 1);
    }

    #[test]
    fn lookup_by_signature() {
        let m = model();
        let ops = vec![
            Operand::Register(Register::new("rbx")),
            Operand::Register(Register::new("rax")),
        ];
        let q = OperandQuery::for_operands(&ops, false);
        let entry = m.get_entry("SUB", &q).unwrap();
        assert_eq!(entry.name, "sub");
        assert_eq!(entry.operands[1].role(), Some(OperandRole::SourceDestination));
        assert_eq!(entry.operands[0].role(), Some(OperandRole::Source));
        assert!(entry.hidden_operands[0].operand.as_flag().is_some());

        let mem_ops = vec![
            Operand::Memory(Memory::based(Register::new("rsi"))),
            Operand::Register(Register::new("rax")),
        ];
        assert!(m
            .get_entry("add", &OperandQuery::for_operands(&mem_ops, false))
            .is_none());
        assert!(m
            .get_entry("add", &OperandQuery::for_operands(&mem_ops, true))
            .is_some());
    }

    #[test]
    fn unknown_mnemonic_is_none() {
        assert!(model().get_entry("vfmadd231pd", &[]).is_none());
    }
}
