use provider::ProviderKind;
use std::fmt;

/// Composite cache key. Two keys are equal exactly when text, provider, model and
/// dimension all match, so results never leak across models.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    provider: ProviderKind,
    model: String,
    dimension: usize,
    content_hash: String,
}

impl CacheKey {
    pub const NAMESPACE: &'static str = "embedding";

    pub fn new(text: &str, provider: ProviderKind, model: &str, dimension: usize) -> Self {
        Self {
            provider,
            model: model.to_string(),
            dimension,
            content_hash: blake3::hash(text.as_bytes()).to_hex().to_string(),
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// `embedding:<provider>:<model>:<dimension>:<contentHash>`
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            Self::NAMESPACE,
            self.provider,
            self.model,
            self.dimension,
            self.content_hash
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_give_identical_keys() {
        let a = CacheKey::new("hello world", ProviderKind::Local, "minilm", 384);
        let b = CacheKey::new("hello world", ProviderKind::Local, "minilm", 384);
        assert_eq!(a, b);
        assert_eq!(a.render(), b.render());
    }

    #[test]
    fn every_component_changes_the_key() {
        let base = CacheKey::new("hello world", ProviderKind::Local, "minilm", 384);
        let variants = [
            CacheKey::new("hello world!", ProviderKind::Local, "minilm", 384),
            CacheKey::new("hello world", ProviderKind::Remote, "minilm", 384),
            CacheKey::new("hello world", ProviderKind::Local, "mpnet", 384),
            CacheKey::new("hello world", ProviderKind::Local, "minilm", 768),
        ];
        for v in variants {
            assert_ne!(base, v);
            assert_ne!(base.render(), v.render());
        }
    }

    #[test]
    fn rendered_layout() {
        let key = CacheKey::new("abc", ProviderKind::Remote, "text-embedding-3-small", 1536);
        let rendered = key.render();
        let parts: Vec<&str> = rendered.split(':').collect();
        assert_eq!(parts[..4], ["embedding", "remote", "text-embedding-3-small", "1536"]);
        assert_eq!(parts[4].len(), 64);
        assert_eq!(parts[4], key.content_hash());
    }
}
