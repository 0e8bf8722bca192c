// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Tool configuration
//!
//! Every knob the instrumenter depends on that is tied to a compiler or
//! architecture version lives here: the text grammars, the reserved
//! registers, the counter layout and the mnemonics of the counter update.
//! All fields have defaults; a TOML file may override any subset.

use std::{fs, path::Path};

use cfg::{RegisterClass, RegisterRange};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Kernel-boundary marker emitted once per kernel by the HSA code object printer.
pub const DEFAULT_KERNEL_MARKER: &str = r"^\s*\.amdgpu_hsa_kernel\s+(?P<name>[^\s,;]+)";
/// Block labels as printed by the AMDGPU backend (`BB0_3`, `.LBB0_3`).
pub const DEFAULT_BLOCK_LABEL: &str = r"^(?:\.L)?BB\d+_\d+$";
/// Mnemonic that ends a kernel.
pub const DEFAULT_TERMINATOR: &str = r"^s_endpgm$";

/// Largest immediate accepted by the `offset:` field of LDS instructions.
pub const MAX_DS_OFFSET: u64 = 0xffff;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub grammar: GrammarConfig,
    pub registers: RegisterConfig,
    pub layout: LayoutConfig,
    pub codegen: CodegenConfig,
}

/// Regular expressions describing the dump's text format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GrammarConfig {
    /// Matched against whole lines; must capture the kernel name as `name`.
    pub kernel_marker: String,
    /// Matched against label names (without the trailing colon).
    pub block_label: String,
    /// Matched against instruction mnemonics.
    pub terminator: String,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        Self {
            kernel_marker: DEFAULT_KERNEL_MARKER.to_string(),
            block_label: DEFAULT_BLOCK_LABEL.to_string(),
            terminator: DEFAULT_TERMINATOR.to_string(),
        }
    }
}

/// Registers the kernel author reserves for the counter update.
///
/// Nothing here is verified against the kernel's actual register
/// allocation; the safe set only pins down which registers the caller has
/// promised to keep free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegisterConfig {
    /// Holds the counter value between load and store.
    pub scratch: String,
    /// Holds the wavefront's region base, set up by the source-level macro.
    pub address: String,
    /// Registers declared free at every block entry.
    pub safe: Vec<String>,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            scratch: "v254".to_string(),
            address: "v255".to_string(),
            safe: vec!["v254".to_string(), "v255".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    /// Bytes reserved per counter. May exceed the width the load and store
    /// move, in which case the counter lives in the slot's low bytes.
    pub slot_size: u32,
    /// Wavefronts sharing one LDS allocation.
    pub wavefronts_per_workgroup: u32,
    /// Upper bound on the counter region, in bytes.
    pub max_region_bytes: u64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            slot_size: 4,
            wavefronts_per_workgroup: 16,
            max_region_bytes: 64 * 1024,
        }
    }
}

/// Mnemonics of the synthesized counter update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodegenConfig {
    pub load: String,
    pub increment: String,
    pub store: String,
    /// Emitted between load and increment; empty to omit.
    pub wait: String,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            load: "ds_read_b32".to_string(),
            increment: "v_add_u32".to_string(),
            store: "ds_write_b32".to_string(),
            wait: "s_waitcnt lgkmcnt(0)".to_string(),
        }
    }
}

impl CodegenConfig {
    /// Width in bytes of the counter the load and store move.
    pub fn counter_size(&self) -> u32 {
        access_width(&self.load).max(access_width(&self.store))
    }
}

/// Access width from a `_b32`/`_b64`-style mnemonic suffix; 4 when absent.
fn access_width(mnemonic: &str) -> u32 {
    match mnemonic.trim().rsplit('_').next() {
        Some("b64" | "u64" | "i64") => 8,
        Some("b96") => 12,
        Some("b128") => 16,
        _ => 4,
    }
}

impl Config {
    /// Load a configuration file. Missing sections and fields keep defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Compile the grammar section.
    pub fn grammar(&self) -> Result<Grammar, ConfigError> {
        Grammar::compile(&self.grammar)
    }

    /// Parse and check the reserved registers against the safe set.
    pub fn reserved_registers(&self) -> Result<ReservedRegisters, ConfigError> {
        let scratch = parse_vgpr(&self.registers.scratch)?;
        let address = parse_vgpr(&self.registers.address)?;

        let safe = self
            .registers
            .safe
            .iter()
            .map(|register| {
                RegisterRange::parse(register.trim()).ok_or_else(|| ConfigError::InvalidRegister {
                    register: register.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (name, register) in [
            (&self.registers.scratch, scratch),
            (&self.registers.address, address),
        ] {
            let covered = safe.iter().any(|range| {
                range.class == register.class
                    && range.first <= register.first
                    && register.last <= range.last
            });
            if !covered {
                return Err(ConfigError::UnsafeRegister {
                    register: name.clone(),
                });
            }
        }

        if scratch.overlaps(&address) {
            return Err(ConfigError::RegisterConflict {
                register: scratch.to_string(),
            });
        }

        Ok(ReservedRegisters { scratch, address })
    }

    /// Validate every section that can be checked without kernel text.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grammar()?;
        self.reserved_registers()?;
        if !matches!(self.layout.slot_size, 4 | 8) {
            return Err(ConfigError::InvalidSlotSize {
                slot_size: self.layout.slot_size,
            });
        }
        let counter_size = self.codegen.counter_size();
        if counter_size > self.layout.slot_size {
            return Err(ConfigError::SlotTooNarrow {
                slot_size: self.layout.slot_size,
                counter_size,
            });
        }
        Ok(())
    }
}

fn parse_vgpr(register: &str) -> Result<RegisterRange, ConfigError> {
    match RegisterRange::parse(register.trim()) {
        Some(range) if range.class == RegisterClass::Vector && range.is_single() => Ok(range),
        _ => Err(ConfigError::InvalidRegister {
            register: register.to_string(),
        }),
    }
}

/// The two registers the counter update clobbers, validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedRegisters {
    pub scratch: RegisterRange,
    pub address: RegisterRange,
}

impl ReservedRegisters {
    pub fn iter(&self) -> impl Iterator<Item = RegisterRange> {
        [self.scratch, self.address].into_iter()
    }
}

/// Compiled text grammars.
#[derive(Debug, Clone)]
pub struct Grammar {
    kernel_marker: Regex,
    block_label: Regex,
    terminator: Regex,
}

lazy_static! {
    static ref DEFAULT_GRAMMAR: Grammar = Grammar::compile(&GrammarConfig::default())
        .expect("built-in grammar patterns are valid");
}

impl Default for Grammar {
    fn default() -> Self {
        DEFAULT_GRAMMAR.clone()
    }
}

impl Grammar {
    pub fn compile(config: &GrammarConfig) -> Result<Self, ConfigError> {
        let compile = |which: &'static str, pattern: &str| {
            Regex::new(pattern).map_err(|source| ConfigError::Grammar { which, source })
        };

        let kernel_marker = compile("kernel marker", &config.kernel_marker)?;
        if !kernel_marker.capture_names().any(|name| name == Some("name")) {
            return Err(ConfigError::MissingNameGroup);
        }

        Ok(Self {
            kernel_marker,
            block_label: compile("block label", &config.block_label)?,
            terminator: compile("terminator", &config.terminator)?,
        })
    }

    /// If `line` is a kernel-boundary marker, return the kernel name.
    pub fn kernel_name<'t>(&self, line: &'t str) -> Option<&'t str> {
        self.kernel_marker
            .captures(line)
            .and_then(|captures| captures.name("name"))
            .map(|name| name.as_str())
    }

    pub fn is_block_label(&self, label: &str) -> bool {
        self.block_label.is_match(label)
    }

    pub fn is_terminator(&self, mnemonic: &str) -> bool {
        self.terminator.is_match(mnemonic)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::{CodegenConfig, Config, ConfigError, Grammar, GrammarConfig};

    #[test]
    fn test_default_grammar() {
        let grammar = Grammar::default();

        assert_eq!(
            grammar.kernel_name("\t.amdgpu_hsa_kernel _Z6kernelPfi"),
            Some("_Z6kernelPfi")
        );
        assert_eq!(grammar.kernel_name("\t.globl _Z6kernelPfi"), None);

        assert!(grammar.is_block_label("BB0_0"));
        assert!(grammar.is_block_label(".LBB12_7"));
        assert!(!grammar.is_block_label(".Lfunc_end0"));
        assert!(!grammar.is_block_label("_Z6kernelPfi"));
        assert!(!grammar.is_block_label("BB0_1x"));

        assert!(grammar.is_terminator("s_endpgm"));
        assert!(!grammar.is_terminator("s_endpgm_saved"));
    }

    #[test]
    fn test_defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(indoc! {r#"
            [layout]
            wavefronts_per_workgroup = 4

            [registers]
            scratch = "v100"
            safe = ["v[100:101]", "v255"]
        "#})
        .unwrap();

        assert_eq!(config.layout.wavefronts_per_workgroup, 4);
        assert_eq!(config.layout.slot_size, 4);
        assert_eq!(config.registers.address, "v255");

        let reserved = config.reserved_registers().unwrap();
        assert_eq!(reserved.scratch.to_string(), "v100");
        assert_eq!(reserved.address.to_string(), "v255");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<Config, _> = toml::from_str("[layout]\nslots = 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_register_outside_safe_set() {
        let mut config = Config::default();
        config.registers.scratch = "v10".to_string();

        assert!(matches!(
            config.reserved_registers(),
            Err(ConfigError::UnsafeRegister { register }) if register == "v10"
        ));
    }

    #[test]
    fn test_register_must_be_single_vgpr() {
        for register in ["s4", "v[254:255]", "vcc", "a0"] {
            let mut config = Config::default();
            config.registers.address = register.to_string();
            assert!(
                matches!(
                    config.reserved_registers(),
                    Err(ConfigError::InvalidRegister { .. })
                ),
                "{register}"
            );
        }
    }

    #[test]
    fn test_scratch_and_address_must_differ() {
        let mut config = Config::default();
        config.registers.scratch = "v255".to_string();

        assert!(matches!(
            config.reserved_registers(),
            Err(ConfigError::RegisterConflict { .. })
        ));
    }

    #[test]
    fn test_marker_requires_name_group() {
        let grammar = GrammarConfig {
            kernel_marker: r"^\s*\.amdgpu_hsa_kernel\s+\S+".to_string(),
            ..GrammarConfig::default()
        };
        assert!(matches!(
            Grammar::compile(&grammar),
            Err(ConfigError::MissingNameGroup)
        ));
    }

    #[test]
    fn test_invalid_pattern() {
        let grammar = GrammarConfig {
            block_label: "BB(".to_string(),
            ..GrammarConfig::default()
        };
        assert!(matches!(
            Grammar::compile(&grammar),
            Err(ConfigError::Grammar { which: "block label", .. })
        ));
    }

    #[test]
    fn test_invalid_slot_size() {
        let mut config = Config::default();
        config.layout.slot_size = 3;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSlotSize { slot_size: 3 })
        ));
    }

    #[test]
    fn test_counter_size_from_mnemonics() {
        let mut codegen = CodegenConfig::default();
        assert_eq!(codegen.counter_size(), 4);

        codegen.store = "ds_write_b64".to_string();
        assert_eq!(codegen.counter_size(), 8);
    }

    #[test]
    fn test_wide_counter_needs_wide_slot() {
        let mut config = Config::default();
        config.codegen.load = "ds_read_b64".to_string();
        config.codegen.store = "ds_write_b64".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SlotTooNarrow {
                slot_size: 4,
                counter_size: 8
            })
        ));

        config.layout.slot_size = 8;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_narrow_counter_in_wide_slot_is_accepted() {
        let mut config = Config::default();
        config.layout.slot_size = 8;

        assert!(config.validate().is_ok());
        assert_eq!(config.codegen.counter_size(), 4);
    }
}
