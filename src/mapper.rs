//! Maps a prediction onto the class registry

use crate::error::Result;
use crate::inference::PredictionResult;
use crate::registry::{ClassDescriptor, ClassRegistry};
use serde::Serialize;

/// The final answer for one upload, handed to the renderer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResponse {
    #[serde(rename = "class")]
    pub descriptor: ClassDescriptor,
    /// Confidence as a percentage, rounded to two decimals
    #[serde(rename = "confidence")]
    pub confidence_percent: f64,
}

pub fn map(registry: &ClassRegistry, prediction: &PredictionResult) -> Result<ClassificationResponse> {
    let descriptor = *registry.get(prediction.class_index)?;
    Ok(ClassificationResponse {
        descriptor,
        confidence_percent: percent(prediction.confidence),
    })
}

/// `round(100 * confidence, 2)`
pub fn percent(confidence: f32) -> f64 {
    (f64::from(confidence) * 100.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClassifyError;

    fn prediction(class_index: usize, confidence: f32) -> PredictionResult {
        PredictionResult {
            class_index,
            probabilities: vec![],
            confidence,
        }
    }

    #[test]
    fn test_map() {
        let response = map(&ClassRegistry::bristol(), &prediction(3, 0.973_14)).unwrap();
        assert_eq!(response.descriptor.label, "Type 4");
        assert_eq!(response.descriptor.index, 3);
        assert_eq!(response.confidence_percent, 97.31);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(1.0), 100.0);
        assert_eq!(percent(0.0), 0.0);
        assert_eq!(percent(0.123_456), 12.35);
        assert_eq!(percent(0.5), 50.0);
    }

    #[test]
    fn test_out_of_range() {
        let err = map(&ClassRegistry::bristol(), &prediction(9, 0.9)).unwrap_err();
        assert!(matches!(err, ClassifyError::IndexOutOfRange { index: 9, len: 7 }));
    }

    #[test]
    fn test_serialize() {
        let response = map(&ClassRegistry::bristol(), &prediction(0, 0.5)).unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["class"]["label"], "Type 1");
        assert_eq!(json["class"]["image_ref"], "images/type-1.png");
        assert_eq!(json["confidence"], 50.0);
    }
}
