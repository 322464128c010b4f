//! Linking annotations record where a target-project skeleton came from:
//!
//! `LINKED NEURON - elastic transformation of skeleton id 12 in project id 2 on server https://...`

use crate::domain::model::{ProjectId, SkeletonId, VolumeId};
use chrono::{DateTime, Local};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

pub const LINKED_NEURON_MARKER: &str = "LINKED NEURON";
pub const UPDATED_MARKER: &str = "UPDATED FROM LINKED NEURON";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneMode {
    /// Keep the primary neurite between its first entry into and last exit
    /// from the volume.
    FirstEntryLastExit,
    /// Drop every node outside the volume.
    Strict,
}

impl std::str::FromStr for PruneMode {
    type Err = crate::utils::error::AddonsError;

    fn from_str(s: &str) -> crate::utils::error::Result<Self> {
        match s {
            "fele" => Ok(Self::FirstEntryLastExit),
            "strict" => Ok(Self::Strict),
            other => Err(crate::utils::error::AddonsError::validation(format!(
                "unknown prune mode '{}', expected fele or strict",
                other
            ))),
        }
    }
}

impl PruneMode {
    /// Annotation added to the pruned neuron, e.g. `pruned (strict) by vol 109`.
    pub fn annotation(&self, volume_id: VolumeId) -> String {
        match self {
            Self::FirstEntryLastExit => {
                format!("pruned (first entry, last exit) by vol {}", volume_id)
            }
            Self::Strict => format!("pruned (strict) by vol {}", volume_id),
        }
    }
}

/// How a linked neuron was derived from its source.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkRelation {
    Unspecified,
    Copy,
    Translation,
    Affine { transform_file: String },
    Elastic,
    ElasticFlipped,
    VolumePruned { volume_id: VolumeId, mode: PruneMode },
    RadiusPruned,
}

impl LinkRelation {
    /// Text placed before `skeleton id` in the linking annotation.
    pub fn text(&self) -> String {
        match self {
            Self::Unspecified => String::new(),
            Self::Copy => "copy of".to_string(),
            Self::Translation => "translation of".to_string(),
            Self::Affine { transform_file } => {
                format!("affine transformation using {} of", transform_file)
            }
            Self::Elastic => "elastic transformation of".to_string(),
            Self::ElasticFlipped => "elastic transformation and flipped of".to_string(),
            Self::VolumePruned { volume_id, mode } => format!("{} of", mode.annotation(*volume_id)),
            Self::RadiusPruned => "radius pruned of".to_string(),
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        static AFFINE: OnceLock<Regex> = OnceLock::new();
        static VOLUME: OnceLock<Regex> = OnceLock::new();
        let affine = AFFINE.get_or_init(|| {
            Regex::new(r"^affine transformation using (.+) of$").expect("valid affine pattern")
        });
        let volume = VOLUME.get_or_init(|| {
            Regex::new(r"^pruned \((first entry, last exit|strict)\) by vol (\d+) of$")
                .expect("valid volume pattern")
        });

        match text.trim() {
            "" => Some(Self::Unspecified),
            "copy of" => Some(Self::Copy),
            "translation of" => Some(Self::Translation),
            "elastic transformation of" => Some(Self::Elastic),
            "elastic transformation and flipped of" => Some(Self::ElasticFlipped),
            "radius pruned of" => Some(Self::RadiusPruned),
            other => {
                if let Some(caps) = affine.captures(other) {
                    return Some(Self::Affine {
                        transform_file: caps[1].to_string(),
                    });
                }
                let caps = volume.captures(other)?;
                let mode = if &caps[1] == "strict" {
                    PruneMode::Strict
                } else {
                    PruneMode::FirstEntryLastExit
                };
                Some(Self::VolumePruned {
                    volume_id: caps[2].parse().ok()?,
                    mode,
                })
            }
        }
    }
}

impl fmt::Display for LinkRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkingAnnotation {
    pub relation: LinkRelation,
    pub skeleton_id: SkeletonId,
    pub project_id: ProjectId,
    pub server: String,
}

impl LinkingAnnotation {
    pub fn new(
        relation: LinkRelation,
        skeleton_id: SkeletonId,
        project_id: ProjectId,
        server: impl Into<String>,
    ) -> Self {
        Self {
            relation,
            skeleton_id,
            project_id,
            server: server.into(),
        }
    }

    pub fn parse(annotation: &str) -> Option<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(
                r"^LINKED NEURON - (?:(.+) )?skeleton id (\d+) in project id (\d+) on server (.+)$",
            )
            .expect("valid linking annotation pattern")
        });
        let caps = pattern.captures(annotation)?;
        let relation = match caps.get(1) {
            Some(m) => LinkRelation::parse(m.as_str())?,
            None => LinkRelation::Unspecified,
        };
        Some(Self {
            relation,
            skeleton_id: caps[2].parse().ok()?,
            project_id: caps[3].parse().ok()?,
            server: caps[4].to_string(),
        })
    }

    /// Whether this annotation points at `skeleton_id` in `project_id`.
    pub fn links_to(&self, skeleton_id: SkeletonId, project_id: ProjectId) -> bool {
        self.skeleton_id == skeleton_id && self.project_id == project_id
    }
}

impl fmt::Display for LinkingAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - ", LINKED_NEURON_MARKER)?;
        if self.relation != LinkRelation::Unspecified {
            write!(f, "{} ", self.relation)?;
        }
        write!(
            f,
            "skeleton id {} in project id {} on server {}",
            self.skeleton_id, self.project_id, self.server
        )
    }
}

/// `UPDATED FROM LINKED NEURON - 2020-07-01 03:15 PM`
pub fn updated_annotation(at: DateTime<Local>) -> String {
    format!("{} - {}", UPDATED_MARKER, at.format("%Y-%m-%d %I:%M %p"))
}

pub fn is_linking_annotation(annotation: &str) -> bool {
    annotation.contains(LINKED_NEURON_MARKER)
}

/// Drop every `LINKED NEURON` and `UPDATED FROM LINKED NEURON` annotation.
pub fn strip_linking_annotations(annotations: &mut Vec<String>) {
    annotations.retain(|a| !is_linking_annotation(a));
}

/// Parsed linking annotations among `annotations`. Update stamps are skipped.
pub fn find_links(annotations: &[String]) -> Vec<LinkingAnnotation> {
    annotations
        .iter()
        .filter(|a| a.starts_with(LINKED_NEURON_MARKER))
        .filter_map(|a| LinkingAnnotation::parse(a))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_with_and_without_relation() {
        let plain = LinkingAnnotation::new(LinkRelation::Unspecified, 12, 2, "https://x.org");
        assert_eq!(
            plain.to_string(),
            "LINKED NEURON - skeleton id 12 in project id 2 on server https://x.org"
        );

        let copy = LinkingAnnotation::new(LinkRelation::Copy, 12, 2, "https://x.org");
        assert_eq!(
            copy.to_string(),
            "LINKED NEURON - copy of skeleton id 12 in project id 2 on server https://x.org"
        );
    }

    #[test]
    fn test_parse_every_relation() {
        let relations = [
            LinkRelation::Unspecified,
            LinkRelation::Copy,
            LinkRelation::Translation,
            LinkRelation::Affine {
                transform_file: "affinetransform_reflect_x.txt".to_string(),
            },
            LinkRelation::Elastic,
            LinkRelation::ElasticFlipped,
            LinkRelation::VolumePruned {
                volume_id: 109,
                mode: PruneMode::FirstEntryLastExit,
            },
            LinkRelation::VolumePruned {
                volume_id: 7,
                mode: PruneMode::Strict,
            },
            LinkRelation::RadiusPruned,
        ];
        for relation in relations {
            let annotation = LinkingAnnotation::new(relation.clone(), 345, 59, "https://x.org");
            let parsed = LinkingAnnotation::parse(&annotation.to_string()).unwrap();
            assert_eq!(parsed, annotation);
        }
    }

    #[test]
    fn test_volume_relation_text() {
        let relation = LinkRelation::VolumePruned {
            volume_id: 109,
            mode: PruneMode::FirstEntryLastExit,
        };
        assert_eq!(relation.text(), "pruned (first entry, last exit) by vol 109 of");
    }

    #[test]
    fn test_parse_rejects_other_annotations() {
        assert!(LinkingAnnotation::parse("left-right flipped").is_none());
        assert!(LinkingAnnotation::parse("UPDATED FROM LINKED NEURON - 2020-07-01 03:15 PM").is_none());
    }

    #[test]
    fn test_updated_annotation_format() {
        let at = Local.with_ymd_and_hms(2020, 7, 1, 15, 5, 0).unwrap();
        assert_eq!(
            updated_annotation(at),
            "UPDATED FROM LINKED NEURON - 2020-07-01 03:05 PM"
        );
    }

    #[test]
    fn test_strip_and_find() {
        let mut annotations = vec![
            "DN".to_string(),
            "LINKED NEURON - copy of skeleton id 1 in project id 2 on server s".to_string(),
            "UPDATED FROM LINKED NEURON - 2020-07-01 03:05 PM".to_string(),
        ];
        let links = find_links(&annotations);
        assert_eq!(links.len(), 1);
        assert!(links[0].links_to(1, 2));

        strip_linking_annotations(&mut annotations);
        assert_eq!(annotations, vec!["DN".to_string()]);
    }
}
