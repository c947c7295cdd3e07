//! Pairwise suitability scoring for a (source, target) image pair.
//!
//! Everything here is pure: categories are derived from pixel counts,
//! aspect ratios and compression density, and the report only steers
//! whether the pipeline resizes the pair before submission.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCategory {
    VerySmall,
    Small,
    Medium,
    Large,
    VeryLarge,
}

impl SizeCategory {
    pub fn from_pixels(pixels: u64) -> Self {
        if pixels > 4_000_000 {
            SizeCategory::VeryLarge
        } else if pixels > 2_000_000 {
            SizeCategory::Large
        } else if pixels > 500_000 {
            SizeCategory::Medium
        } else if pixels > 100_000 {
            SizeCategory::Small
        } else {
            SizeCategory::VerySmall
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            SizeCategory::VerySmall => 1,
            SizeCategory::Small => 2,
            SizeCategory::Medium => 3,
            SizeCategory::Large => 4,
            SizeCategory::VeryLarge => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectCategory {
    Square,
    Moderate,
    Wide,
    Extreme,
}

impl AspectCategory {
    pub fn from_ratio(ratio: f64) -> Self {
        if !ratio.is_finite() || ratio > 2.5 || ratio < 0.4 {
            AspectCategory::Extreme
        } else if ratio > 1.8 || ratio < 0.55 {
            AspectCategory::Wide
        } else if ratio > 1.2 || ratio < 0.8 {
            AspectCategory::Moderate
        } else {
            AspectCategory::Square
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityCategory {
    VeryLow,
    Low,
    Medium,
    High,
}

impl QualityCategory {
    /// Rough quality from bytes-per-pixel of the encoded file.
    pub fn from_density(pixels: u64, bytes: u64) -> Self {
        if pixels == 0 {
            return QualityCategory::VeryLow;
        }
        let bytes_per_pixel = bytes as f64 / pixels as f64;
        if bytes_per_pixel > 3.0 {
            QualityCategory::High
        } else if bytes_per_pixel > 1.5 {
            QualityCategory::Medium
        } else if bytes_per_pixel > 0.5 {
            QualityCategory::Low
        } else {
            QualityCategory::VeryLow
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchVerdict {
    Good,
    Moderate,
    Poor,
}

impl MatchVerdict {
    pub fn score(self) -> f64 {
        match self {
            MatchVerdict::Good => 3.0,
            MatchVerdict::Moderate => 2.0,
            MatchVerdict::Poor => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchVerdict::Good => "good",
            MatchVerdict::Moderate => "moderate",
            MatchVerdict::Poor => "poor",
        }
    }
}

impl fmt::Display for MatchVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub width: u32,
    pub height: u32,
    pub size: SizeCategory,
    pub aspect_ratio: AspectCategory,
    pub quality: QualityCategory,
    pub warnings: Vec<String>,
}

impl ImageAnalysis {
    pub fn new(width: u32, height: u32, byte_size: u64) -> Self {
        let pixels = u64::from(width) * u64::from(height);
        let ratio = if height == 0 {
            f64::INFINITY
        } else {
            f64::from(width) / f64::from(height)
        };
        let size = SizeCategory::from_pixels(pixels);
        let aspect_ratio = AspectCategory::from_ratio(ratio);
        let quality = QualityCategory::from_density(pixels, byte_size);

        let mut warnings = Vec::new();
        match size {
            SizeCategory::VeryLarge => {
                warnings.push("Image is very large and may slow down processing".to_string())
            }
            SizeCategory::Small | SizeCategory::VerySmall => {
                warnings.push("Image resolution is low, results may be limited".to_string())
            }
            SizeCategory::Medium | SizeCategory::Large => {}
        }
        if aspect_ratio == AspectCategory::Extreme {
            warnings.push("Unusual aspect ratio may affect AI processing quality".to_string());
        }

        Self {
            width,
            height,
            size,
            aspect_ratio,
            quality,
            warnings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub size_match: MatchVerdict,
    pub aspect_ratio_match: MatchVerdict,
    pub quality_match: MatchVerdict,
    pub overall_score: f64,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: String,
    pub message: String,
    pub action: String,
}

/// Score below which the pair is resized to matching dimensions.
pub const SIZE_MATCH_THRESHOLD: f64 = 2.5;

pub fn compare(source: &ImageAnalysis, target: &ImageAnalysis) -> CompatibilityReport {
    let mut issues = Vec::new();
    let mut suggestions = Vec::new();

    let size_gap = source.size.rank().abs_diff(target.size.rank());
    let size_match = if size_gap > 1 {
        issues.push("Significant size difference between images".to_string());
        suggestions.push("Consider resizing images to similar dimensions".to_string());
        MatchVerdict::Poor
    } else {
        MatchVerdict::Good
    };

    let aspect_ratio_match = if source.aspect_ratio != target.aspect_ratio {
        suggestions.push("Different aspect ratios may affect clothing fit".to_string());
        MatchVerdict::Moderate
    } else {
        MatchVerdict::Good
    };

    let quality_match = if source.quality != target.quality {
        suggestions.push("Quality difference may affect result consistency".to_string());
        MatchVerdict::Moderate
    } else {
        MatchVerdict::Good
    };

    let overall_score =
        (size_match.score() + aspect_ratio_match.score() + quality_match.score()) / 3.0;

    CompatibilityReport {
        size_match,
        aspect_ratio_match,
        quality_match,
        overall_score,
        issues,
        suggestions,
    }
}

impl CompatibilityReport {
    pub fn should_match_sizes(&self) -> bool {
        self.overall_score < SIZE_MATCH_THRESHOLD
    }

    pub fn recommendations(&self) -> Vec<Recommendation> {
        let mut out = Vec::new();
        if self.overall_score < 2.0 {
            out.push(Recommendation {
                kind: "warning".to_string(),
                message: "Image compatibility is low. Results may not be optimal.".to_string(),
                action: "Consider using images with similar dimensions and quality".to_string(),
            });
        }
        if self.size_match == MatchVerdict::Poor {
            out.push(Recommendation {
                kind: "suggestion".to_string(),
                message: "Large size difference detected".to_string(),
                action: "Images have been automatically resized for better compatibility"
                    .to_string(),
            });
        }
        out
    }

    /// Text block appended to the generation prompt.
    pub fn prompt_section(&self) -> String {
        let mut text = format!(
            "**Image Compatibility Analysis**:\n\
             - Overall Compatibility Score: {:.1}/3.0\n\
             - Size Match: {}\n\
             - Aspect Ratio Match: {}\n\
             - Quality Match: {}\n",
            self.overall_score, self.size_match, self.aspect_ratio_match, self.quality_match
        );
        if !self.issues.is_empty() {
            text.push_str("\n**Detected Issues**:\n");
            for issue in &self.issues {
                text.push_str(&format!("- {issue}\n"));
            }
        }
        if !self.suggestions.is_empty() {
            text.push_str("\n**Processing Suggestions**:\n");
            for suggestion in &self.suggestions {
                text.push_str(&format!("- {suggestion}\n"));
            }
        }
        text
    }
}
