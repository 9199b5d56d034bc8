use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::*;

use crate::timeq::Cycle;

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> anyhow::Result<Self> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .with_context(|| format!("cannot deserialize config section {}", value)),
            None => {
                warn!("config section not found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    /// One trace per core.
    pub traces: Vec<PathBuf>,
    /// Stop as soon as any core finishes instead of waiting for all of them.
    pub early_exit: bool,
    /// Cycle cap for the run; 0 runs until completion.
    pub timeout: Cycle,
    /// Base seed; core `i` seeds its walk-address generator with `seed + i`.
    pub seed: u64,
    pub log_level: u64,
    pub stats_json: Option<PathBuf>,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            traces: Vec::new(),
            early_exit: false,
            timeout: 0,
            seed: 0,
            log_level: 0,
            stats_json: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct CoreConfig {
    pub window_depth: usize,
    pub window_width: usize,
    /// Instruction budget per core; 0 means unset.
    pub limit_insts: u64,
    pub l1_tlb_entries: usize,
    pub l1_tlb_ways: usize,
    pub l2_tlb_entries: usize,
    pub l2_tlb_ways: usize,
    pub line_bytes: u64,
    /// Inclusive range synthetic page-walk reads are drawn from.
    pub walk_region_start: u64,
    pub walk_region_end: u64,
    /// Give every core a private first-level cache.
    pub core_caches: bool,
}

impl Config for CoreConfig {}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            window_depth: 128,
            window_width: 4,
            limit_insts: 0,
            l1_tlb_entries: 64,
            l1_tlb_ways: 4,
            l2_tlb_entries: 1024,
            l2_tlb_ways: 8,
            line_bytes: 64,
            walk_region_start: 0xA000_0000,
            walk_region_end: 0xFFFF_FFFF,
            core_caches: false,
        }
    }
}

impl CoreConfig {
    pub fn has_limit(&self) -> bool {
        self.limit_insts > 0
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub sets: usize,
    pub ways: usize,
    pub hit_latency: Cycle,
    pub queue_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sets: 64,
            ways: 8,
            hit_latency: 4,
            queue_capacity: 16,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct CacheHierarchyConfig {
    /// Put a last-level cache shared by all cores in front of memory.
    pub shared_cache: bool,
    pub l1: CacheConfig,
    pub llc: CacheConfig,
}

impl Config for CacheHierarchyConfig {}

impl Default for CacheHierarchyConfig {
    fn default() -> Self {
        Self {
            shared_cache: false,
            l1: CacheConfig::default(),
            llc: CacheConfig {
                sets: 2048,
                ways: 16,
                hit_latency: 20,
                queue_capacity: 64,
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageMode {
    #[default]
    Identity,
    Random,
}

impl FromStr for PageMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "identity" => Ok(Self::Identity),
            "random" => Ok(Self::Random),
            _ => Err(format!(
                "unsupported page mode '{}', expected one of: identity, random",
                value
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct MemConfig {
    pub latency: Cycle,
    pub bytes_per_cycle: u32,
    pub access_bytes: u32,
    pub queue_capacity: usize,
    pub pages: PageMode,
    /// Physical frame pool for `PageMode::Random`.
    pub frames: u64,
}

impl Config for MemConfig {}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            latency: 100,
            bytes_per_cycle: 64,
            access_bytes: 64,
            queue_capacity: 32,
            pages: PageMode::Identity,
            frames: 1 << 20, // 4 GiB of 4 KiB frames
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_section_uses_defaults() {
        let core = CoreConfig::from_section(None).unwrap();
        assert_eq!(core, CoreConfig::default());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let table: Table = toml::from_str("[core]\nwindow_depth = 8\nlimit_insts = 1000\n").unwrap();
        let core = CoreConfig::from_section(table.get("core")).unwrap();
        assert_eq!(core.window_depth, 8);
        assert!(core.has_limit());
        assert_eq!(core.window_width, CoreConfig::default().window_width);
    }

    #[test]
    fn nested_cache_tables() {
        let table: Table =
            toml::from_str("[cache]\nshared_cache = true\n[cache.llc]\nsets = 16\n").unwrap();
        let caches = CacheHierarchyConfig::from_section(table.get("cache")).unwrap();
        assert!(caches.shared_cache);
        assert_eq!(caches.llc.sets, 16);
        assert_eq!(caches.llc.ways, CacheConfig::default().ways);
    }

    #[test]
    fn page_mode_parses() {
        let table: Table = toml::from_str("[mem]\npages = \"random\"\n").unwrap();
        let mem = MemConfig::from_section(table.get("mem")).unwrap();
        assert_eq!(mem.pages, PageMode::Random);
        assert_eq!("identity".parse::<PageMode>(), Ok(PageMode::Identity));
        assert!("linear".parse::<PageMode>().is_err());
    }

    #[test]
    fn bad_field_type_is_an_error() {
        let table: Table = toml::from_str("[core]\nwindow_depth = \"deep\"\n").unwrap();
        assert!(CoreConfig::from_section(table.get("core")).is_err());
    }
}
