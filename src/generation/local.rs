use anyhow::Result;
use async_trait::async_trait;

use super::{DreamAnalysis, DreamEmotion, DreamGenerator, DreamInput, DreamSymbol};

const SYMBOLS: &[(&str, &str, &str)] = &[
    ("water", "emotional flow, cleansing, renewal", "high"),
    ("ocean", "depth of the unconscious, vast feeling", "high"),
    ("flying", "freedom, transcendence, ambition", "high"),
    ("forest", "exploring the unknown, inner uncertainty", "medium"),
    ("star", "hope, guidance, open possibility", "high"),
    ("animal", "instinct, intuition, raw energy", "medium"),
    ("house", "security, belonging, sense of self", "medium"),
    ("friend", "relationships, support network", "low"),
    ("light", "hope, awakening, positive energy", "high"),
    ("dark", "fear, the unknown, hidden threat", "medium"),
];

const EMOTIONS: &[(&str, u8)] = &[
    ("happy", 85),
    ("excited", 90),
    ("calm", 70),
    ("mysterious", 75),
    ("afraid", 80),
    ("nervous", 85),
    ("curious", 70),
    ("lonely", 60),
    ("warm", 75),
    ("angry", 90),
    ("sad", 70),
];

const THEMES: &[(&[&str], &str)] = &[
    (&["fly", "flying", "sky"], "transcendence and freedom"),
    (&["water", "ocean", "sea"], "emotion and the unconscious"),
    (&["chase", "chased", "escape", "running"], "pressure and avoidance"),
    (&["love", "lover"], "relationships"),
    (&["death", "vanish", "disappear"], "change and transformation"),
];

/// Keyword-driven template analysis used when no remote model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStubGenerator;

#[async_trait]
impl DreamGenerator for LocalStubGenerator {
    async fn analyze(&self, input: &DreamInput) -> Result<DreamAnalysis> {
        let text = format!("{} {}", input.title, input.content).to_lowercase();

        let symbols = SYMBOLS
            .iter()
            .filter(|(symbol, _, _)| text.contains(symbol))
            .map(|(symbol, meaning, significance)| DreamSymbol {
                symbol: symbol.to_string(),
                meaning: meaning.to_string(),
                significance: significance.to_string(),
            })
            .collect::<Vec<_>>();

        let mut emotions = EMOTIONS
            .iter()
            .filter(|(emotion, _)| text.contains(emotion))
            .map(|(emotion, intensity)| DreamEmotion {
                emotion: emotion.to_string(),
                intensity: *intensity,
            })
            .collect::<Vec<_>>();
        if let Some(mood) = input.mood.as_deref().filter(|mood| !mood.trim().is_empty()) {
            if !emotions.iter().any(|emotion| emotion.emotion == mood) {
                emotions.push(DreamEmotion {
                    emotion: mood.to_string(),
                    intensity: 65,
                });
            }
        }
        if emotions.is_empty() {
            emotions.push(DreamEmotion {
                emotion: "curious".to_string(),
                intensity: 70,
            });
        }

        let mut themes = THEMES
            .iter()
            .filter(|(keywords, _)| keywords.iter().any(|keyword| text.contains(keyword)))
            .map(|(_, theme)| theme.to_string())
            .collect::<Vec<_>>();
        if themes.is_empty() {
            themes = vec!["personal growth".to_string(), "inner exploration".to_string()];
        }

        let interpretation = format!(
            "The dream \"{}\" centres on {}. Its imagery suggests your mind is working through {}.",
            input.title,
            themes.join(" and "),
            match symbols.first() {
                Some(symbol) => symbol.meaning.clone(),
                None => "feelings that have not yet found words".to_string(),
            }
        );

        Ok(DreamAnalysis {
            symbols,
            emotions,
            themes,
            interpretation,
            psychological_insights: vec![
                "Recurring images point to concerns that deserve daytime attention.".to_string(),
                "The emotional tone of a dream often mirrors your current stress level."
                    .to_string(),
                "Your unconscious may be rehearsing responses to real situations.".to_string(),
            ],
            recommendations: vec![
                "Keep a dream journal and note recurring symbols.".to_string(),
                "Reflect on what in your waking life matches the dream's mood.".to_string(),
                "Give yourself time to unwind before sleep.".to_string(),
            ],
        })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
