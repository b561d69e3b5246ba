use serde::Deserialize;
use hashbrown::HashMap;
use std::fs;
use std::path::Path;
use stratum_geom::{Facing, OrientationTransform};

use crate::types::{Block, BlockId, MAX_VARIANT, Variant};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("rule for block {id}: {reason}")]
    Rule { id: BlockId, reason: String },
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct VariantRulesConfig {
    #[serde(default)]
    pub rule: Vec<VariantRuleDef>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct VariantRuleDef {
    pub ids: Vec<BlockId>,
    /// Shorthand: the low two variant bits hold a clockwise facing index.
    #[serde(default)]
    pub facing_low_bits: bool,
    #[serde(default)]
    pub rotate: Option<Vec<Variant>>,
    #[serde(default)]
    pub mirror_x: Option<Vec<Variant>>,
}

type Table = [Variant; 16];

const IDENTITY: Table = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];

/// How direction-dependent variants change under rotation and mirroring.
/// Types without a rule keep their variant unchanged.
#[derive(Clone, Debug, Default)]
pub struct VariantRules {
    rotate: HashMap<BlockId, Table>,
    mirror: HashMap<BlockId, Table>,
}

impl VariantRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: VariantRulesConfig = toml::from_str(text)?;
        Self::from_config(cfg)
    }

    pub fn from_config(cfg: VariantRulesConfig) -> Result<Self, ConfigError> {
        let mut rules = VariantRules::new();
        for def in cfg.rule {
            let (rotate, mirror) = if def.facing_low_bits {
                (facing_rotate_table(), facing_mirror_table())
            } else {
                let first = def.ids.first().copied().unwrap_or(0);
                (
                    compile_table(first, def.rotate.as_deref())?,
                    compile_table(first, def.mirror_x.as_deref())?,
                )
            };
            for id in def.ids {
                rules.rotate.insert(id, rotate);
                rules.mirror.insert(id, mirror);
            }
        }
        Ok(rules)
    }

    /// Treat the low two variant bits of `id` as a facing index.
    pub fn with_facing_rule(mut self, id: BlockId) -> Self {
        self.rotate.insert(id, facing_rotate_table());
        self.mirror.insert(id, facing_mirror_table());
        self
    }

    pub fn rotate_cw(&self, block: Block) -> Block {
        match self.rotate.get(&block.id) {
            Some(t) => Block {
                variant: t[block.variant as usize],
                ..block
            },
            None => block,
        }
    }

    pub fn mirror_x(&self, block: Block) -> Block {
        match self.mirror.get(&block.id) {
            Some(t) => Block {
                variant: t[block.variant as usize],
                ..block
            },
            None => block,
        }
    }

    /// Mirror first, then one clockwise step per quarter turn.
    pub fn apply(&self, block: Block, transform: &OrientationTransform) -> Block {
        let mut b = if transform.is_mirrored() {
            self.mirror_x(block)
        } else {
            block
        };
        for _ in 0..transform.rotation_count() {
            b = self.rotate_cw(b);
        }
        b
    }
}

fn compile_table(id: BlockId, entries: Option<&[Variant]>) -> Result<Table, ConfigError> {
    let mut table = IDENTITY;
    if let Some(entries) = entries {
        if entries.len() > table.len() {
            return Err(ConfigError::Rule {
                id,
                reason: format!("{} entries, at most 16 allowed", entries.len()),
            });
        }
        for (i, &v) in entries.iter().enumerate() {
            if v > MAX_VARIANT {
                return Err(ConfigError::Rule {
                    id,
                    reason: format!("variant {v} exceeds 4 bits"),
                });
            }
            table[i] = v;
        }
    }
    Ok(table)
}

fn facing_rotate_table() -> Table {
    let mut t = IDENTITY;
    for (v, slot) in t.iter_mut().enumerate() {
        let v = v as Variant;
        let facing = Facing::from_index(v & 3).rotated_cw(1);
        *slot = (v & !3) | facing.index();
    }
    t
}

fn facing_mirror_table() -> Table {
    let mut t = IDENTITY;
    for (v, slot) in t.iter_mut().enumerate() {
        let v = v as Variant;
        let facing = Facing::from_index(v & 3).mirrored_x();
        *slot = (v & !3) | facing.index();
    }
    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facing_rule_keeps_high_bits() {
        let rules = VariantRules::new().with_facing_rule(53);
        // facing north (0) with the upper-half flag (4) set
        let b = Block::new(53, 0b0100);
        let r = rules.rotate_cw(b);
        assert_eq!(r.variant, 0b0101);
        assert_eq!(rules.mirror_x(Block::new(53, 0b0101)).variant, 0b0111);
        // untouched type
        assert_eq!(rules.rotate_cw(Block::new(1, 3)).variant, 3);
    }

    #[test]
    fn four_turns_restore_variant() {
        let rules = VariantRules::new().with_facing_rule(53);
        let t = OrientationTransform::new(1, 1, 0, false);
        for v in 0..16 {
            let mut b = Block::new(53, v);
            for _ in 0..4 {
                b = rules.rotate_cw(b);
            }
            assert_eq!(b.variant, v);
            assert_eq!(rules.apply(Block::new(53, v), &t).variant, v);
        }
    }

    #[test]
    fn parses_tables_from_toml() {
        let text = r#"
            [[rule]]
            ids = [17, 18]
            rotate = [0, 2, 1]

            [[rule]]
            ids = [53]
            facing_low_bits = true
        "#;
        let rules = VariantRules::from_toml_str(text).unwrap();
        assert_eq!(rules.rotate_cw(Block::new(18, 1)).variant, 2);
        assert_eq!(rules.rotate_cw(Block::new(17, 7)).variant, 7);
        assert_eq!(rules.rotate_cw(Block::new(53, 3)).variant, 0);
    }

    #[test]
    fn rejects_out_of_range_entries() {
        let text = r#"
            [[rule]]
            ids = [1]
            rotate = [16]
        "#;
        assert!(matches!(
            VariantRules::from_toml_str(text),
            Err(ConfigError::Rule { id: 1, .. })
        ));
    }
}
