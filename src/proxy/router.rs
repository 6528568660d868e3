// Model router - maps client aliases to upstream models and lists them

use crate::config::ProviderProfile;
use crate::proxy::schema::{ModelInfo, ModelsResponse};

#[derive(Debug, Clone)]
pub struct ModelRouter {
    /// (alias, upstream model), in profile order.
    routes: Vec<(String, String)>,
    owner: Vec<String>,
    created: i64,
}

impl ModelRouter {
    pub fn new(profile: &ProviderProfile) -> Self {
        let routes: Vec<(String, String)> = profile
            .models
            .iter()
            .map(|(alias, upstream)| (alias.clone(), upstream.clone()))
            .collect();
        let owner = routes
            .iter()
            .map(|(_, upstream)| profile.owner_for(upstream))
            .collect();
        Self {
            routes,
            owner,
            created: chrono::Utc::now().timestamp(),
        }
    }

    /// Upstream model for an alias, or `None` when this instance does not
    /// serve it.
    pub fn resolve(&self, alias: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, upstream)| upstream.as_str())
    }

    pub fn aliases(&self) -> Vec<&str> {
        self.routes.iter().map(|(alias, _)| alias.as_str()).collect()
    }

    pub fn models_response(&self) -> ModelsResponse {
        let data = self
            .routes
            .iter()
            .zip(&self.owner)
            .map(|((alias, _), owner)| ModelInfo {
                id: alias.clone(),
                object: "model".to_string(),
                created: self.created,
                owned_by: owner.clone(),
            })
            .collect();
        ModelsResponse {
            object: "list".to_string(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::builtin_profiles;

    fn openrouter() -> ProviderProfile {
        builtin_profiles(|_| None)
            .into_iter()
            .find(|p| p.name == "openrouter")
            .unwrap()
    }

    #[test]
    fn test_resolve_alias() {
        let router = ModelRouter::new(&openrouter());
        assert_eq!(router.resolve("gpt-4o"), Some("deepseek/deepseek-chat"));
        assert_eq!(router.resolve("deepseek/deepseek-chat"), None);
        assert_eq!(router.aliases(), vec!["gpt-4o"]);
    }

    #[test]
    fn test_models_response_lists_aliases() {
        let response = ModelRouter::new(&openrouter()).models_response();
        assert_eq!(response.object, "list");
        assert_eq!(response.data.len(), 1);
        assert_eq!(response.data[0].id, "gpt-4o");
        assert_eq!(response.data[0].object, "model");
        assert_eq!(response.data[0].owned_by, "deepseek");
        assert!(response.data[0].created > 0);
    }
}
