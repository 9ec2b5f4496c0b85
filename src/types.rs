use std::str::FromStr;

use serde::Deserialize;

/// How the runtime treats container images when creating a container.
///
/// - `Default`: pull, falling back to a cached image when the pull fails.
/// - `Always`: every create must pull a fresh image.
/// - `Once`: the first create on this host must pull; later ones reuse it.
/// - `PreferCached`: use a cached image when present, pull otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImagePullBehavior {
    #[default]
    Default,
    Always,
    Once,
    PreferCached,
}

impl ImagePullBehavior {
    /// Whether a failed create can never fall back to a cached image.
    pub fn requires_fresh_image(self) -> bool {
        matches!(self, ImagePullBehavior::Always | ImagePullBehavior::Once)
    }
}

impl FromStr for ImagePullBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(ImagePullBehavior::Default),
            "always" => Ok(ImagePullBehavior::Always),
            "once" => Ok(ImagePullBehavior::Once),
            "prefer-cached" | "prefer_cached" => Ok(ImagePullBehavior::PreferCached),
            other => Err(format!(
                "invalid image_pull_behavior: {other} (expected \"default\", \"always\", \"once\" or \"prefer-cached\")"
            )),
        }
    }
}

/// Where a volume's host directory lives and who owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeScope {
    /// Created for the task and removed with it.
    #[default]
    Task,
    /// Shared between tasks; never removed by a single task's cleanup.
    Shared,
}
