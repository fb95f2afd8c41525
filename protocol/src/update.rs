//! Update types and their typed payloads.
//!
//! Every update the broker fans out carries exactly one [`UpdatePayload`]. The
//! payload variant decides the [`UpdateType`] tag that subscriptions are matched
//! against, so a payload can never be delivered under the wrong tag.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sentinel sent in place of a register value that could not be read.
pub const UNAVAILABLE: &str = "N/A";

/// General purpose and segment registers collected on x86-64 targets.
pub const X86_64_REGISTERS: &[&str] = &[
    "rax", "rbx", "rcx", "rdx", "rbp", "rsp", "rdi", "rsi", "rip", "r8", "r9", "r10", "r11",
    "r12", "r13", "r14", "r15", "cs", "ds", "es", "fs", "gs", "ss",
];

/// The fixed set of state categories a viewer can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UpdateType {
    /// Register values
    #[serde(rename = "register")]
    Register,
    /// Disassembly at the program counter
    #[serde(rename = "disasm")]
    Disasm,
    /// Raw stack memory starting at the stack pointer
    #[serde(rename = "stack")]
    Stack,
    /// Call stack
    #[serde(rename = "bt")]
    Backtrace,
}

impl UpdateType {
    /// All update types, in the order a stop event publishes them.
    pub const ALL: [UpdateType; 4] = [
        UpdateType::Register,
        UpdateType::Disasm,
        UpdateType::Stack,
        UpdateType::Backtrace,
    ];

    /// Tag used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Register => "register",
            UpdateType::Disasm => "disasm",
            UpdateType::Stack => "stack",
            UpdateType::Backtrace => "bt",
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown update type name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown update type: {0}")]
pub struct UnknownUpdateType(pub String);

impl FromStr for UpdateType {
    type Err = UnknownUpdateType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register" | "reg" => Ok(UpdateType::Register),
            "disasm" => Ok(UpdateType::Disasm),
            "stack" => Ok(UpdateType::Stack),
            "bt" | "backtrace" => Ok(UpdateType::Backtrace),
            other => Err(UnknownUpdateType(other.to_string())),
        }
    }
}

/// A single register reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterValue {
    /// The register's value masked to 64 bits
    Value(u64),
    /// The register could not be read; carries the [`UNAVAILABLE`] sentinel
    Unavailable(String),
}

impl RegisterValue {
    /// A reading for a register the debugger could not evaluate.
    pub fn unavailable() -> Self {
        RegisterValue::Unavailable(UNAVAILABLE.to_string())
    }

    /// The numeric value, if the register was readable.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RegisterValue::Value(v) => Some(*v),
            RegisterValue::Unavailable(_) => None,
        }
    }
}

/// Wire key of [`RegisterSnapshot::flags`], reserved in the register map
pub const FLAGS_KEY: &str = "eflags";

/// Register values captured at one stop.
///
/// On the wire this is a flat mapping: every register name maps to its value
/// (or the `"N/A"` sentinel) and the flags register is rendered as text under
/// the `eflags` key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegisterSnapshot {
    /// Must not contain [`FLAGS_KEY`]; [`collect`](Self::collect) never adds it
    #[serde(flatten)]
    pub registers: BTreeMap<String, RegisterValue>,
    /// Flags register as the debugger prints it, e.g. `[ ZF PF ]`
    #[serde(rename = "eflags")]
    pub flags: String,
}

impl RegisterSnapshot {
    /// Read each register in `names` through `read`.
    ///
    /// `read` returns `None` for a register it cannot evaluate, which is
    /// recorded as the unavailable sentinel rather than failing the snapshot.
    /// A name equal to [`FLAGS_KEY`] is skipped, the flags travel in `flags`.
    pub fn collect<F>(names: &[&str], mut read: F, flags: impl Into<String>) -> Self
    where
        F: FnMut(&str) -> Option<i128>,
    {
        let registers = names
            .iter()
            .filter(|name| **name != FLAGS_KEY)
            .map(|name| {
                let value = match read(name) {
                    // Sign-extended readings wrap to their unsigned 64-bit form
                    Some(raw) => RegisterValue::Value(raw as u64),
                    None => RegisterValue::unavailable(),
                };
                (name.to_string(), value)
            })
            .collect();

        Self {
            registers,
            flags: flags.into(),
        }
    }

    /// Look up a register's numeric value.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.registers.get(name).and_then(RegisterValue::as_u64)
    }
}

/// A slice of stack memory and the address it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StackSnapshot {
    pub data: Vec<u8>,
    pub sp: u64,
}

/// Payload of an update message, one variant per [`UpdateType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "update_type", content = "data")]
pub enum UpdatePayload {
    #[serde(rename = "register")]
    Register(RegisterSnapshot),
    /// One disassembled instruction per line
    #[serde(rename = "disasm")]
    Disasm(String),
    #[serde(rename = "stack")]
    Stack(StackSnapshot),
    /// One call frame per line
    #[serde(rename = "bt")]
    Backtrace(String),
}

impl UpdatePayload {
    /// The tag subscriptions are matched against.
    pub fn update_type(&self) -> UpdateType {
        match self {
            UpdatePayload::Register(_) => UpdateType::Register,
            UpdatePayload::Disasm(_) => UpdateType::Disasm,
            UpdatePayload::Stack(_) => UpdateType::Stack,
            UpdatePayload::Backtrace(_) => UpdateType::Backtrace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_collect_skips_flags_register_name() {
        let mut read_names = Vec::new();
        let snapshot = RegisterSnapshot::collect(
            &["rax", FLAGS_KEY, "rip"],
            |name| {
                read_names.push(name.to_string());
                Some(0x246)
            },
            "[ PF ZF IF ]",
        );

        assert_eq!(read_names, ["rax", "rip"]);
        assert!(!snapshot.registers.contains_key(FLAGS_KEY));

        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json.matches("\"eflags\"").count(), 1, "{json}");
        let back: RegisterSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[rstest]
    #[case("register", UpdateType::Register)]
    #[case("reg", UpdateType::Register)]
    #[case("disasm", UpdateType::Disasm)]
    #[case("stack", UpdateType::Stack)]
    #[case("bt", UpdateType::Backtrace)]
    #[case("backtrace", UpdateType::Backtrace)]
    fn test_update_type_from_str(#[case] input: &str, #[case] expected: UpdateType) {
        assert_eq!(input.parse::<UpdateType>().unwrap(), expected);
    }

    #[test]
    fn test_update_type_from_str_unknown() {
        let err = "memory".parse::<UpdateType>().unwrap_err();
        assert_eq!(err, UnknownUpdateType("memory".to_string()));
    }

    #[test]
    fn test_update_type_wire_tags() {
        for update_type in UpdateType::ALL {
            let json = serde_json::to_string(&update_type).unwrap();
            assert_eq!(json, format!("\"{}\"", update_type.as_str()));
        }
    }

    #[test]
    fn test_collect_marks_unreadable_registers() {
        let snapshot = RegisterSnapshot::collect(
            &["rax", "rip", "fs"],
            |name| match name {
                "rax" => Some(-1),
                "rip" => Some(0x401000),
                _ => None,
            },
            "[ ZF ]",
        );

        assert_eq!(snapshot.get("rax"), Some(u64::MAX));
        assert_eq!(snapshot.get("rip"), Some(0x401000));
        assert_eq!(snapshot.get("fs"), None);
        assert_eq!(snapshot.registers["fs"], RegisterValue::unavailable());
        assert_eq!(snapshot.flags, "[ ZF ]");
    }

    #[test]
    fn test_register_snapshot_wire_shape() {
        let snapshot = RegisterSnapshot::collect(
            &["rsp", "gs"],
            |name| (name == "rsp").then_some(0x7ffe_0000),
            "[ IF ]",
        );

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "rsp": 0x7ffe_0000u64, "gs": "N/A", "eflags": "[ IF ]" })
        );
    }

    #[test]
    fn test_payload_update_type() {
        assert_eq!(
            UpdatePayload::Disasm(String::new()).update_type(),
            UpdateType::Disasm
        );
        assert_eq!(
            UpdatePayload::Stack(StackSnapshot::default()).update_type(),
            UpdateType::Stack
        );
        assert_eq!(
            UpdatePayload::Backtrace(String::new()).update_type(),
            UpdateType::Backtrace
        );
        assert_eq!(
            UpdatePayload::Register(RegisterSnapshot::default()).update_type(),
            UpdateType::Register
        );
    }
}
