use serde::{Deserialize, Serialize};

use parley_knowledge::KnowledgeIndex;

/// An LLM-backed reply policy: one system prompt plus sampling settings and
/// routing hints. Personas are plain configuration dispatched by a single
/// run path — there is no type per persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaConfig {
    /// Stable key (e.g. `"sales"`); recorded on outbound message metadata.
    pub key: String,
    pub display_name: String,
    /// May contain `{companyName}`, `{channel}`, `{contactName}` placeholders.
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Keywords the router scores (weight 2) when ranking candidates.
    #[serde(default)]
    pub routing_keywords: Vec<String>,
    /// Topic names the router scores (weight 1).
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// The persona set the router picks from.
///
/// The built-in set (sales, support) is the permanent fallback; a custom
/// catalog loaded from knowledge `config/personas` replaces the routing
/// candidates when present. Both coexist: a custom catalog that omits a
/// key still falls back to the built-ins for execution.
pub struct PersonaCatalog {
    builtin: Vec<PersonaConfig>,
    custom: Option<Vec<PersonaConfig>>,
}

impl PersonaCatalog {
    pub fn builtin_only() -> Self {
        Self {
            builtin: builtin_personas(),
            custom: None,
        }
    }

    /// Load the custom catalog from the knowledge corpus when one exists.
    pub fn from_knowledge(index: &KnowledgeIndex) -> Self {
        let custom = index.get("config", "personas").and_then(|doc| {
            let personas: Vec<PersonaConfig> = doc
                .data
                .get("personas")?
                .as_array()?
                .iter()
                .filter_map(|p| serde_json::from_value(p.clone()).ok())
                .collect();
            (!personas.is_empty()).then_some(personas)
        });

        Self {
            builtin: builtin_personas(),
            custom,
        }
    }

    pub fn has_custom(&self) -> bool {
        self.custom.is_some()
    }

    /// Candidates the router ranks: the custom catalog when present,
    /// otherwise the built-ins.
    pub fn routing_candidates(&self) -> &[PersonaConfig] {
        self.custom.as_deref().unwrap_or(&self.builtin)
    }

    /// Resolve a persona key for execution, checking the custom catalog
    /// first and falling back to the built-in set.
    pub fn get(&self, key: &str) -> Option<&PersonaConfig> {
        self.custom
            .as_deref()
            .and_then(|c| c.iter().find(|p| p.key == key))
            .or_else(|| self.builtin.iter().find(|p| p.key == key))
    }

    /// The designated default persona key.
    pub fn default_key(&self) -> &str {
        self.routing_candidates()
            .iter()
            .find(|p| p.is_default)
            .or_else(|| self.routing_candidates().first())
            .map(|p| p.key.as_str())
            .unwrap_or("support")
    }
}

/// The fixed intent → persona mapping used when no custom catalog exists.
pub fn intent_to_persona(intent: &str) -> &'static str {
    match intent {
        "sales" => "sales",
        _ => "support",
    }
}

/// Compiled-in persona set.
pub fn builtin_personas() -> Vec<PersonaConfig> {
    vec![
        PersonaConfig {
            key: "sales".to_string(),
            display_name: "Sales Assistant".to_string(),
            system_prompt: "You are a sales assistant for {companyName}, chatting with \
                            {contactName} on {channel}. Understand what the customer needs, \
                            present matching products clearly, and guide them toward a \
                            purchase without being pushy. Keep replies short and concrete."
                .to_string(),
            temperature: 0.7,
            max_tokens: 600,
            routing_keywords: vec![
                "buy".into(),
                "price".into(),
                "purchase".into(),
                "order".into(),
                "product".into(),
                "cost".into(),
                "discount".into(),
            ],
            topics: vec!["products".into(), "pricing".into(), "promotions".into()],
            is_default: false,
        },
        PersonaConfig {
            key: "support".to_string(),
            display_name: "Support Assistant".to_string(),
            system_prompt: "You are a support assistant for {companyName}, helping \
                            {contactName} on {channel}. Resolve the customer's problem \
                            using the knowledge base. Be empathetic and precise; if you \
                            cannot resolve an issue, say so plainly."
                .to_string(),
            temperature: 0.4,
            max_tokens: 600,
            routing_keywords: vec![
                "help".into(),
                "problem".into(),
                "issue".into(),
                "broken".into(),
                "error".into(),
                "not working".into(),
                "question".into(),
            ],
            topics: vec!["faq".into(), "policies".into(), "troubleshooting".into()],
            is_default: true,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_defaults_to_support() {
        let catalog = PersonaCatalog::builtin_only();
        assert_eq!(catalog.default_key(), "support");
        assert!(catalog.get("sales").is_some());
        assert!(catalog.get("poetry").is_none());
    }

    #[test]
    fn custom_catalog_replaces_candidates_but_keeps_builtin_execution() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config");
        std::fs::create_dir_all(&config).unwrap();
        std::fs::write(
            config.join("personas.json"),
            serde_json::json!({
                "personas": [{
                    "key": "onboarding",
                    "displayName": "Onboarding Guide",
                    "systemPrompt": "You onboard new users of {companyName}.",
                    "temperature": 0.5,
                    "maxTokens": 400,
                    "routingKeywords": ["setup", "start"],
                    "topics": ["getting-started"],
                    "isDefault": true
                }]
            })
            .to_string(),
        )
        .unwrap();

        let index = KnowledgeIndex::load(dir.path()).unwrap();
        let catalog = PersonaCatalog::from_knowledge(&index);

        assert!(catalog.has_custom());
        assert_eq!(catalog.default_key(), "onboarding");
        assert_eq!(catalog.routing_candidates().len(), 1);
        // Built-in personas still resolve for execution.
        assert!(catalog.get("support").is_some());
    }

    #[test]
    fn intent_map_covers_unknown_intents() {
        assert_eq!(intent_to_persona("sales"), "sales");
        assert_eq!(intent_to_persona("billing"), "support");
    }
}
