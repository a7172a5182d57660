use tracing::{debug, warn};

use super::calibration::CalibrationProfile;
use super::label::{ModelLabel, PostureLabel, PostureResult};
use super::scorer::PostureScorer;
use super::PostureAngles;
use crate::config::{ClassifierMode, Config};
use crate::predictor::{PersonalizedPredictor, Prediction, RemotePredictor};

/// ルールベースと個人化予測の切り替え
///
/// どちらも `PostureResult` を返す。個人化予測が失敗したフレームは
/// ルールベースの結果になる。
pub enum PostureClassifier {
    RuleBased,
    Personalized(Box<dyn PersonalizedPredictor>),
}

impl PostureClassifier {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(match config.pipeline.classifier {
            ClassifierMode::RuleBased => PostureClassifier::RuleBased,
            ClassifierMode::Personalized => {
                PostureClassifier::Personalized(Box::new(RemotePredictor::new(&config.predictor)?))
            }
        })
    }

    pub fn personalized<P: PersonalizedPredictor + 'static>(predictor: P) -> Self {
        PostureClassifier::Personalized(Box::new(predictor))
    }

    pub fn mode(&self) -> ClassifierMode {
        match self {
            PostureClassifier::RuleBased => ClassifierMode::RuleBased,
            PostureClassifier::Personalized(_) => ClassifierMode::Personalized,
        }
    }

    pub fn classify(
        &mut self,
        scorer: &PostureScorer,
        angles: PostureAngles,
        confidence: f32,
        profile: &CalibrationProfile,
    ) -> PostureResult {
        let rule_based = scorer.evaluate(angles, confidence, profile);
        match self {
            PostureClassifier::RuleBased => rule_based,
            PostureClassifier::Personalized(predictor) => match predictor.predict(&angles) {
                Ok(prediction) => merge_prediction(rule_based, prediction),
                Err(e) => {
                    warn!("personalized predictor unavailable, using rule-based result: {e}");
                    rule_based
                }
            },
        }
    }
}

fn merge_prediction(rule_based: PostureResult, prediction: Prediction) -> PostureResult {
    let label = prediction
        .manual_label
        .parse::<PostureLabel>()
        .ok()
        .filter(|l| l.is_posture())
        .unwrap_or(rule_based.label);
    let ml_label = prediction.ml_label.parse::<ModelLabel>().unwrap_or(ModelLabel::Unknown);
    debug!(%label, %ml_label, score = prediction.score, "personalized prediction");

    PostureResult {
        label,
        score: prediction.score.clamp(0, 100) as u8,
        message: label.message().to_string(),
        suggestions: prediction.suggestions,
        ml_label: Some(ml_label),
        ..rule_based
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::error::PredictorError;
    use crate::posture::CalibrationStore;

    struct Fixed(Result<Prediction, ()>);

    impl PersonalizedPredictor for Fixed {
        fn predict(&mut self, _angles: &PostureAngles) -> Result<Prediction, PredictorError> {
            self.0
                .clone()
                .map_err(|_| PredictorError::NoResult("model not loaded".to_string()))
        }
    }

    fn setup() -> (PostureScorer, CalibrationStore) {
        let scoring = ScoringConfig::default();
        (PostureScorer::new(scoring.clone()), CalibrationStore::new(scoring))
    }

    #[test]
    fn test_rule_based_mode() {
        let (scorer, store) = setup();
        let mut classifier = PostureClassifier::RuleBased;
        let result = classifier.classify(&scorer, PostureAngles::new(166.0, 150.0, 169.0), 0.9, &store.snapshot());
        assert_eq!(classifier.mode(), ClassifierMode::RuleBased);
        assert_eq!(result.label, PostureLabel::BackMisalignment);
        assert_eq!(result.ml_label, None);
    }

    #[test]
    fn test_personalized_overrides_score_and_label() {
        let (scorer, store) = setup();
        let mut classifier = PostureClassifier::personalized(Fixed(Ok(Prediction {
            ml_label: "recline".to_string(),
            manual_label: "Neck Misalignment".to_string(),
            score: 140,
            suggestions: vec!["FIX: Avoid tilting your head too far back.".to_string()],
        })));
        let result = classifier.classify(&scorer, PostureAngles::new(166.0, 174.0, 169.0), 0.9, &store.snapshot());
        assert_eq!(result.label, PostureLabel::NeckMisalignment);
        assert_eq!(result.message, "Neck Misalignment");
        assert_eq!(result.score, 100);
        assert_eq!(result.ml_label, Some(ModelLabel::Recline));
        assert_eq!(result.suggestions.len(), 1);
        // 角度と詳細はルールベースのもの
        assert_eq!(result.angles, Some(PostureAngles::new(166.0, 174.0, 169.0)));
        assert_eq!(result.details.len(), 3);
    }

    #[test]
    fn test_unrecognized_manual_label_keeps_rule_label() {
        let (scorer, store) = setup();
        let mut classifier = PostureClassifier::personalized(Fixed(Ok(Prediction {
            ml_label: "sideways".to_string(),
            manual_label: "Unknown".to_string(),
            score: 50,
            suggestions: Vec::new(),
        })));
        let result = classifier.classify(&scorer, PostureAngles::new(166.0, 174.0, 169.0), 0.9, &store.snapshot());
        assert_eq!(result.label, PostureLabel::Aligned);
        assert_eq!(result.ml_label, Some(ModelLabel::Unknown));
        assert_eq!(result.score, 50);
    }

    #[test]
    fn test_predictor_failure_falls_back() {
        let (scorer, store) = setup();
        let mut classifier = PostureClassifier::personalized(Fixed(Err(())));
        let result = classifier.classify(&scorer, PostureAngles::new(166.0, 150.0, 169.0), 0.9, &store.snapshot());
        assert_eq!(classifier.mode(), ClassifierMode::Personalized);
        assert_eq!(result.label, PostureLabel::BackMisalignment);
        assert!(result.suggestions[0].contains("slouching"));
        assert_eq!(result.ml_label, None);
    }
}
