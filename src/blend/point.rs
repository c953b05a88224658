//! `BlendSpacePoint` (C6): a concrete flavor assignment for every pipeline
//! and every blend injection point within it, plus a single "default flavor"
//! fallback. Produced by the explorer (C7) for each point it samples or
//! enumerates, and handed to the backend (C9) to drive one compile+run.

use std::fmt;
use std::sync::Arc;

use crate::blend::BlendConfig;
use crate::lole::Program;

/// One pipeline's flavor assignment: whether to skip it entirely, its
/// overall flavor, and a flavor per blend injection point inside it (`None`
/// entries fall back to the pipeline's own flavor, which itself falls back
/// to the point's `default_flavor`).
#[derive(Debug, Clone, Default)]
pub struct PipelinePoint {
    pub ignore: bool,
    pub flavor: Option<Arc<BlendConfig>>,
    pub point_flavors: Vec<Option<Arc<BlendConfig>>>,
}

impl PipelinePoint {
    pub fn new(blend_point_count: usize) -> Self {
        PipelinePoint {
            ignore: false,
            flavor: None,
            point_flavors: vec![None; blend_point_count],
        }
    }
}

/// A full blend-space point for one `Program`: one `PipelinePoint` per
/// pipeline, in pipeline order, plus the crate-wide default.
#[derive(Debug, Clone, Default)]
pub struct BlendSpacePoint {
    pub pipelines: Vec<PipelinePoint>,
    pub default_flavor: Option<Arc<BlendConfig>>,
}

impl BlendSpacePoint {
    /// Builds an all-default point shaped to `program`: one `PipelinePoint`
    /// per pipeline, sized to that pipeline's blend point count.
    pub fn for_program(program: &Program) -> Self {
        BlendSpacePoint {
            pipelines: program
                .blend_point_counts()
                .into_iter()
                .map(PipelinePoint::new)
                .collect(),
            default_flavor: None,
        }
    }

    /// Resolves the effective flavor for blend point `point_index` within
    /// pipeline `pipeline_index`, falling back from the point, to the
    /// pipeline, to the crate-wide default, to the hardcoded base config.
    pub fn resolve(&self, pipeline_index: usize, point_index: usize) -> BlendConfig {
        let pipeline = &self.pipelines[pipeline_index];
        pipeline
            .point_flavors
            .get(point_index)
            .and_then(|f| f.clone())
            .or_else(|| pipeline.flavor.clone())
            .or_else(|| self.default_flavor.clone())
            .map(|rc| (*rc).clone())
            .unwrap_or_else(crate::blend::base_config)
    }
}

fn fmt_flavor(f: &mut fmt::Formatter<'_>, flavor: &Option<Arc<BlendConfig>>) -> fmt::Result {
    match flavor {
        Some(cfg) => write!(f, "{cfg}"),
        None => write!(f, "NULL"),
    }
}

impl fmt::Display for BlendSpacePoint {
    /// A deterministic, nested-brace serialization used for golden-string
    /// tests and exploration log output:
    /// `{default:<flavor>;pipelines:[{ignore:<0|1>,flavor:<flavor>,points:[<flavor>,...]};...]}`.
    /// Pipelines marked `ignore` are omitted entirely (spec §6), matching
    /// the original's `to_string()`'s `if (pipeline.ignore) continue;`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{default:")?;
        fmt_flavor(f, &self.default_flavor)?;
        write!(f, ";pipelines:[")?;
        let mut emitted = 0;
        for p in self.pipelines.iter().filter(|p| !p.ignore) {
            if emitted > 0 {
                write!(f, ";")?;
            }
            emitted += 1;
            write!(f, "{{ignore:{},flavor:", if p.ignore { 1 } else { 0 })?;
            fmt_flavor(f, &p.flavor)?;
            write!(f, ",points:[")?;
            for (j, pf) in p.point_flavors.iter().enumerate() {
                if j > 0 {
                    write!(f, ",")?;
                }
                fmt_flavor(f, pf)?;
            }
            write!(f, "]}}")?;
        }
        write!(f, "]}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_default_point_serializes_to_the_golden_string() {
        let point = BlendSpacePoint {
            pipelines: vec![PipelinePoint::new(2), PipelinePoint::new(0)],
            default_flavor: None,
        };
        assert_eq!(
            point.to_string(),
            "{default:NULL;pipelines:[{ignore:0,flavor:NULL,points:[NULL,NULL]};{ignore:0,flavor:NULL,points:[]}]}"
        );
    }

    #[test]
    fn ignored_pipelines_are_omitted_from_the_serialization() {
        let mut ignored = PipelinePoint::new(1);
        ignored.ignore = true;
        let point = BlendSpacePoint {
            pipelines: vec![PipelinePoint::new(0), ignored, PipelinePoint::new(0)],
            default_flavor: None,
        };
        assert_eq!(
            point.to_string(),
            "{default:NULL;pipelines:[{ignore:0,flavor:NULL,points:[]};{ignore:0,flavor:NULL,points:[]}]}"
        );
    }

    #[test]
    fn resolve_falls_back_point_then_pipeline_then_default() {
        let point_flavor = Arc::new(BlendConfig::new(2, None, 1).unwrap());
        let pipeline_flavor = Arc::new(BlendConfig::new(4, None, 0).unwrap());
        let default_flavor = Arc::new(BlendConfig::new(8, None, 0).unwrap());

        let mut pp = PipelinePoint::new(2);
        pp.point_flavors[0] = Some(point_flavor.clone());
        pp.flavor = Some(pipeline_flavor.clone());
        let point = BlendSpacePoint {
            pipelines: vec![pp],
            default_flavor: Some(default_flavor.clone()),
        };

        assert_eq!(point.resolve(0, 0), (*point_flavor).clone());
        assert_eq!(point.resolve(0, 1), (*pipeline_flavor).clone());
    }

    #[test]
    fn resolve_uses_base_config_with_nothing_set() {
        let pp = PipelinePoint::new(1);
        let point = BlendSpacePoint {
            pipelines: vec![pp],
            default_flavor: None,
        };
        assert_eq!(point.resolve(0, 0), crate::blend::base_config());
    }
}
