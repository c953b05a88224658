//! Blend space (C6): the per-injection-point flavor configuration
//! (`BlendConfig`) and the enumeration of the space of configurations a
//! kernel can be compiled/run with (`GenBlendFlags`-gated domains), plus the
//! concrete per-pipeline assignment of flavors (`BlendSpacePoint`, in
//! `blend::point`).

pub mod point;

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use dashmap::DashMap;

use crate::error::BlendConfigError;

pub use point::BlendSpacePoint;

/// The vector/scalar kernel shape a pipeline stage is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputationType {
    Scalar,
    Avx512,
    /// SIMD lane width in bits: one of 256/512/1024/2048.
    Vector(u32),
}

impl ComputationType {
    /// Whether this entry is one of the small "representative" set used when
    /// `GenBlendFlags::ONLY_ESSENTIAL_COMP` narrows the computation domain.
    /// `Vector(1024)` is deliberately double-counted here: it is both the
    /// vector-size family's representative entry *and* essential on its own,
    /// since it is the shape the `x100` demo shortcut resolves to.
    fn is_essential(self) -> bool {
        matches!(self, ComputationType::Scalar | ComputationType::Avx512 | ComputationType::Vector(1024))
    }

    fn canonical(self) -> String {
        match self {
            ComputationType::Scalar => "scalar".to_string(),
            ComputationType::Avx512 => "avx512".to_string(),
            ComputationType::Vector(width) => format!("vector({width})"),
        }
    }

    fn parse(s: &str) -> Result<Option<ComputationType>, BlendConfigError> {
        match s {
            "" | "NULL" | "null" => Ok(None),
            "scalar" => Ok(Some(ComputationType::Scalar)),
            "avx512" | "hyper" => Ok(Some(ComputationType::Avx512)),
            "vector(256)" => Ok(Some(ComputationType::Vector(256))),
            "vector(512)" => Ok(Some(ComputationType::Vector(512))),
            "vector(1024)" | "x100" => Ok(Some(ComputationType::Vector(1024))),
            "vector(2048)" => Ok(Some(ComputationType::Vector(2048))),
            other => Err(BlendConfigError::InvalidComputationType(other.to_string())),
        }
    }
}

/// One concrete flavor choice for a pipeline or a single blend injection
/// point: how many concurrent FSM instances run it, what kernel shape it is
/// compiled for, and how many morsels ahead it prefetches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlendConfig {
    pub concurrent_fsms: u32,
    pub computation_type: Option<ComputationType>,
    pub prefetch: i32,
}

impl BlendConfig {
    pub fn new(concurrent_fsms: u32, computation_type: Option<ComputationType>, prefetch: i32) -> Result<Self, BlendConfigError> {
        if !(0..=4).contains(&prefetch) {
            return Err(BlendConfigError::PrefetchOutOfRange(prefetch));
        }
        Ok(BlendConfig {
            concurrent_fsms,
            computation_type,
            prefetch,
        })
    }
}

impl fmt::Display for BlendConfig {
    /// Always emits all three recognized keys, in this fixed order, so the
    /// result round-trips through `FromStr` regardless of the order a caller
    /// happened to write them in.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let comp = self.computation_type.map(ComputationType::canonical).unwrap_or_default();
        write!(
            f,
            "concurrent_fsms={},computation_type={},prefetch={}",
            self.concurrent_fsms, comp, self.prefetch
        )
    }
}

impl FromStr for BlendConfig {
    type Err = BlendConfigError;

    /// Accepts `""`/`"NULL"`/`"null"` for the null configuration, the whole-
    /// string shortcuts `"hyper"` (scalar, default fsms/prefetch) and
    /// `"x100"` (vector(1024), default fsms/prefetch), or comma-separated
    /// `key=value` pairs (`concurrent_fsms`, `computation_type`, `prefetch`)
    /// in any order. Keys omitted from a `key=value` string fall back to the
    /// null configuration's defaults; unknown keys are fatal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "NULL" | "null" => return Ok(base_config()),
            "hyper" => return BlendConfig::new(1, Some(ComputationType::Scalar), 0),
            "x100" => return BlendConfig::new(1, Some(ComputationType::Vector(1024)), 0),
            _ => {}
        }

        let mut fsms = None;
        let mut computation_type = None;
        let mut prefetch = None;
        for pair in s.split(',') {
            let (key, value) = pair.split_once('=').ok_or_else(|| BlendConfigError::UnknownOption(pair.to_string()))?;
            match key {
                "concurrent_fsms" => {
                    fsms = Some(value.parse::<u32>().map_err(|_| BlendConfigError::InvalidValue {
                        key: "concurrent_fsms".to_string(),
                        value: value.to_string(),
                    })?);
                }
                "computation_type" => computation_type = Some(ComputationType::parse(value)?),
                "prefetch" => {
                    prefetch = Some(value.parse::<i32>().map_err(|_| BlendConfigError::InvalidValue {
                        key: "prefetch".to_string(),
                        value: value.to_string(),
                    })?);
                }
                other => return Err(BlendConfigError::UnknownOption(other.to_string())),
            }
        }

        BlendConfig::new(fsms.unwrap_or(1), computation_type.unwrap_or(None), prefetch.unwrap_or(0))
    }
}

/// Gates which subset of the full blend space `enumerate` produces. A manual
/// bitset, matching `lole::TableFlags`'s own small hand-rolled flag type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GenBlendFlags(u8);

impl GenBlendFlags {
    pub const ONLY_BASE: GenBlendFlags = GenBlendFlags(1 << 0);
    pub const BINARY_PREFETCH: GenBlendFlags = GenBlendFlags(1 << 1);
    pub const ONLY_ESSENTIAL_FSM: GenBlendFlags = GenBlendFlags(1 << 2);
    pub const ONLY_ESSENTIAL_COMP: GenBlendFlags = GenBlendFlags(1 << 3);
    pub const NO_CACHE: GenBlendFlags = GenBlendFlags(1 << 4);

    pub const fn empty() -> Self {
        GenBlendFlags(0)
    }

    pub const fn contains(self, other: GenBlendFlags) -> bool {
        self.0 & other.0 == other.0
    }

    fn cache_key(self) -> u8 {
        // NO_CACHE is not itself part of what the cache is keyed on — it
        // selects whether the cache is consulted at all.
        self.0 & !GenBlendFlags::NO_CACHE.0
    }
}

impl std::ops::BitOr for GenBlendFlags {
    type Output = GenBlendFlags;
    fn bitor(self, rhs: GenBlendFlags) -> GenBlendFlags {
        GenBlendFlags(self.0 | rhs.0)
    }
}

const DOM_FSMS: &[u32] = &[1, 2, 4, 8, 16, 32];
const DOM_FSMS_ESSENTIAL: &[u32] = &[1, 32];
const DOM_PREFETCH: &[i32] = &[0, 4, 3, 2, 1];
const DOM_PREFETCH_BINARY: &[i32] = &[0, 4];
const DOM_COMP: &[ComputationType] = &[
    ComputationType::Scalar,
    ComputationType::Avx512,
    ComputationType::Vector(256),
    ComputationType::Vector(512),
    ComputationType::Vector(1024),
    ComputationType::Vector(2048),
];

fn comp_domain(flags: GenBlendFlags) -> Vec<Option<ComputationType>> {
    let mut out: Vec<Option<ComputationType>> = vec![None];
    for &c in DOM_COMP {
        if !flags.contains(GenBlendFlags::ONLY_ESSENTIAL_COMP) || c.is_essential() {
            out.push(Some(c));
        }
    }
    out
}

fn fsm_domain(flags: GenBlendFlags) -> &'static [u32] {
    if flags.contains(GenBlendFlags::ONLY_ESSENTIAL_FSM) {
        DOM_FSMS_ESSENTIAL
    } else {
        DOM_FSMS
    }
}

fn prefetch_domain(flags: GenBlendFlags) -> &'static [i32] {
    if flags.contains(GenBlendFlags::BINARY_PREFETCH) {
        DOM_PREFETCH_BINARY
    } else {
        DOM_PREFETCH
    }
}

fn enumeration_cache() -> &'static DashMap<u8, Vec<BlendConfig>> {
    static CACHE: OnceLock<DashMap<u8, Vec<BlendConfig>>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

/// Enumerates the cross product of `(fsms, computation_type, prefetch)`
/// allowed under `flags`. Results are cached per flag-set unless `NO_CACHE`
/// is set (spec §4.8: "cached by flag-set").
pub fn enumerate(flags: GenBlendFlags) -> Vec<BlendConfig> {
    if !flags.contains(GenBlendFlags::NO_CACHE) {
        if let Some(cached) = enumeration_cache().get(&flags.cache_key()) {
            return cached.clone();
        }
    }

    let only_base = flags.contains(GenBlendFlags::ONLY_BASE);
    let mut out = Vec::new();
    for &fsms in fsm_domain(flags) {
        for comp in comp_domain(flags) {
            for &prefetch in prefetch_domain(flags) {
                if only_base {
                    // Spec §4.8: OnlyBase excludes the null config and, for
                    // any fsms other than 1, restricts prefetch to 0.
                    if comp.is_none() {
                        continue;
                    }
                    if fsms != 1 && prefetch != 0 {
                        continue;
                    }
                }
                out.push(BlendConfig {
                    concurrent_fsms: fsms,
                    computation_type: comp,
                    prefetch,
                });
            }
        }
    }

    if !flags.contains(GenBlendFlags::NO_CACHE) {
        enumeration_cache().insert(flags.cache_key(), out.clone());
    }
    out
}

/// The single default flavor a pipeline runs under when nothing else is
/// specified: no forced computation kind, one FSM, no prefetch.
pub fn base_config() -> BlendConfig {
    BlendConfig {
        concurrent_fsms: 1,
        computation_type: None,
        prefetch: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        let cfg = BlendConfig::new(8, Some(ComputationType::Vector(1024)), 2).unwrap();
        let s = cfg.to_string();
        let parsed: BlendConfig = s.parse().unwrap();
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn scenario_1_blend_round_trip_literal_string() {
        let s = "concurrent_fsms=8,computation_type=vector(512),prefetch=1";
        let cfg: BlendConfig = s.parse().unwrap();
        assert_eq!(cfg.to_string(), s);
    }

    #[test]
    fn key_value_pairs_parse_in_any_order() {
        let a: BlendConfig = "concurrent_fsms=4,computation_type=scalar,prefetch=2".parse().unwrap();
        let b: BlendConfig = "prefetch=2,computation_type=scalar,concurrent_fsms=4".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn whole_string_shortcuts_resolve_to_canonical_forms() {
        let hyper: BlendConfig = "hyper".parse().unwrap();
        assert_eq!(hyper.computation_type, Some(ComputationType::Scalar));
        assert_eq!(hyper.concurrent_fsms, 1);
        assert_eq!(hyper.prefetch, 0);

        let x100: BlendConfig = "x100".parse().unwrap();
        assert_eq!(x100.computation_type, Some(ComputationType::Vector(1024)));

        let none: BlendConfig = "NULL".parse().unwrap();
        assert_eq!(none.computation_type, None);
        let none2: BlendConfig = "".parse().unwrap();
        assert_eq!(none2.computation_type, None);
        let none3: BlendConfig = "null".parse().unwrap();
        assert_eq!(none3.computation_type, None);
    }

    #[test]
    fn computation_type_field_also_accepts_the_hyper_and_x100_aliases() {
        let hyper: BlendConfig = "concurrent_fsms=4,computation_type=hyper,prefetch=0".parse().unwrap();
        assert_eq!(hyper.computation_type, Some(ComputationType::Avx512));
        let x100: BlendConfig = "concurrent_fsms=4,computation_type=x100,prefetch=0".parse().unwrap();
        assert_eq!(x100.computation_type, Some(ComputationType::Vector(1024)));
    }

    #[test]
    fn prefetch_out_of_range_is_rejected() {
        let err = BlendConfig::new(1, None, 9).unwrap_err();
        assert!(matches!(err, BlendConfigError::PrefetchOutOfRange(9)));
    }

    #[test]
    fn unknown_computation_type_is_rejected() {
        let err: Result<BlendConfig, _> = "concurrent_fsms=1,computation_type=bogus,prefetch=0".parse();
        assert!(matches!(err, Err(BlendConfigError::InvalidComputationType(_))));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err: Result<BlendConfig, _> = "concurrent_fsms=1,bogus=1,prefetch=0".parse();
        assert!(matches!(err, Err(BlendConfigError::UnknownOption(_))));
    }

    #[test]
    fn only_base_excludes_the_null_config_and_restricts_prefetch() {
        let configs = enumerate(GenBlendFlags::ONLY_BASE | GenBlendFlags::NO_CACHE);
        assert!(!configs.is_empty());
        assert!(configs.iter().all(|c| c.computation_type.is_some()));
        assert!(configs.iter().all(|c| c.concurrent_fsms == 1 || c.prefetch == 0));
    }

    #[test]
    fn full_enumeration_is_the_cross_product_size() {
        let configs = enumerate(GenBlendFlags::NO_CACHE);
        assert_eq!(configs.len(), DOM_FSMS.len() * (DOM_COMP.len() + 1) * DOM_PREFETCH.len());
    }

    #[test]
    fn only_essential_flags_shrink_the_domains() {
        let flags = GenBlendFlags::ONLY_ESSENTIAL_FSM
            | GenBlendFlags::ONLY_ESSENTIAL_COMP
            | GenBlendFlags::BINARY_PREFETCH
            | GenBlendFlags::NO_CACHE;
        let configs = enumerate(flags);
        assert_eq!(configs.len(), DOM_FSMS_ESSENTIAL.len() * 4 * DOM_PREFETCH_BINARY.len());
    }

    #[test]
    fn enumeration_is_cached_per_flag_set() {
        let flags = GenBlendFlags::ONLY_ESSENTIAL_FSM;
        let first = enumerate(flags);
        let second = enumerate(flags);
        assert_eq!(first, second);
    }
}
