//! Layer classification for tensor-file names.
//!
//! [`classify`] is the only name → class mapping in the crate. The strategy
//! engine uses it to look up base tiers and the prefetcher uses it to walk the
//! dependency graph, so the two can never disagree about an object.
//!
//! Rules are checked in order, first match wins (case-insensitive substring,
//! except `emb` which must stand alone between separators):
//!
//! ```text
//! "embedding" | "emb"        → embedding
//! "pooler"                   → pooler
//! "classifier"               → classifier
//! "output" | "head"          → lm_head
//! "config" | "json" | "yaml" → config
//! "checkpoint" | "ckpt"      → checkpoint
//! "layer" [s] [_.-] <digits> → encoder_layer_<digits>
//! otherwise                  → other
//! ```

use std::collections::HashSet;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Coarse category of a named object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum LayerClass {
    Config,
    Embedding,
    EncoderLayer(u32),
    Pooler,
    Classifier,
    /// Language-model / output head.
    OutputHead,
    Checkpoint,
    Other,
}

impl LayerClass {
    /// Key used in the strategy engine's tier table.
    ///
    /// The three output-family classes share the `output` key.
    pub fn policy_key(&self) -> String {
        match self {
            LayerClass::Config => "config".to_string(),
            LayerClass::Embedding => "embedding".to_string(),
            LayerClass::EncoderLayer(n) => format!("layer{n}"),
            LayerClass::Pooler | LayerClass::Classifier | LayerClass::OutputHead => {
                "output".to_string()
            }
            LayerClass::Checkpoint => "checkpoint".to_string(),
            LayerClass::Other => "other".to_string(),
        }
    }

    /// Layer index for positional classes.
    pub fn index(&self) -> Option<u32> {
        match self {
            LayerClass::EncoderLayer(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for LayerClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerClass::Config => write!(f, "config"),
            LayerClass::Embedding => write!(f, "embedding"),
            LayerClass::EncoderLayer(n) => write!(f, "encoder_layer_{n}"),
            LayerClass::Pooler => write!(f, "pooler"),
            LayerClass::Classifier => write!(f, "classifier"),
            LayerClass::OutputHead => write!(f, "lm_head"),
            LayerClass::Checkpoint => write!(f, "checkpoint"),
            LayerClass::Other => write!(f, "other"),
        }
    }
}

impl FromStr for LayerClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "config" => Ok(LayerClass::Config),
            "embedding" => Ok(LayerClass::Embedding),
            "pooler" => Ok(LayerClass::Pooler),
            "classifier" => Ok(LayerClass::Classifier),
            "lm_head" => Ok(LayerClass::OutputHead),
            "checkpoint" => Ok(LayerClass::Checkpoint),
            "other" => Ok(LayerClass::Other),
            _ => s
                .strip_prefix("encoder_layer_")
                .and_then(|n| n.parse().ok())
                .map(LayerClass::EncoderLayer)
                .ok_or_else(|| format!("unknown layer class '{s}'")),
        }
    }
}

impl From<LayerClass> for String {
    fn from(class: LayerClass) -> Self {
        class.to_string()
    }
}

impl TryFrom<String> for LayerClass {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Classify an object name. Total and deterministic.
pub fn classify(name: &str) -> LayerClass {
    let lower = name.to_ascii_lowercase();
    let has = |needle: &str| lower.contains(needle);

    if has("embedding") || has_token(&lower, "emb") {
        LayerClass::Embedding
    } else if has("pooler") {
        LayerClass::Pooler
    } else if has("classifier") {
        LayerClass::Classifier
    } else if has("output") || has("head") {
        LayerClass::OutputHead
    } else if has("config") || has("json") || has("yaml") {
        LayerClass::Config
    } else if has("checkpoint") || has("ckpt") {
        LayerClass::Checkpoint
    } else if let Some((_, index)) = layer_index_span(name) {
        LayerClass::EncoderLayer(index)
    } else {
        LayerClass::Other
    }
}

/// Whether `token` occurs in `lower` bounded by non-alphanumerics or the ends.
fn has_token(lower: &str, token: &str) -> bool {
    let bytes = lower.as_bytes();
    lower.match_indices(token).any(|(start, _)| {
        let end = start + token.len();
        let open = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let close = end == bytes.len() || !bytes[end].is_ascii_alphanumeric();
        open && close
    })
}

/// Locate the numeric layer index in a name.
///
/// Returns the byte range of the digits and their value. Accepts `layer3`,
/// `layer_3`, `layers.3`, `encoder.layer.3.weight` and similar.
pub fn layer_index_span(name: &str) -> Option<(Range<usize>, u32)> {
    let lower = name.to_ascii_lowercase();
    let mut from = 0;

    while let Some(found) = lower[from..].find("layer") {
        let mut pos = from + found + "layer".len();
        let bytes = lower.as_bytes();

        if bytes.get(pos) == Some(&b's') {
            pos += 1;
        }
        if matches!(bytes.get(pos), Some(b'_' | b'.' | b'-')) {
            pos += 1;
        }

        let digits = bytes[pos..].iter().take_while(|b| b.is_ascii_digit()).count();
        if digits > 0 {
            if let Ok(index) = lower[pos..pos + digits].parse() {
                return Some((pos..pos + digits, index));
            }
        }
        from = from + found + "layer".len();
    }
    None
}

/// Rewrite the layer index embedded in `name`, keeping everything else.
///
/// `layer0.bin` with index 1 becomes `layer1.bin`.
pub fn with_layer_index(name: &str, index: u32) -> Option<String> {
    let (span, _) = layer_index_span(name)?;
    let mut out = String::with_capacity(name.len() + 2);
    out.push_str(&name[..span.start]);
    out.push_str(&index.to_string());
    out.push_str(&name[span.end..]);
    Some(out)
}

/// Fixed directed graph over layer classes describing forward-pass order.
#[derive(Debug, Clone, Copy)]
pub struct DependencyGraph {
    encoder_layers: u32,
}

impl DependencyGraph {
    pub fn new(encoder_layers: u32) -> Self {
        Self { encoder_layers }
    }

    /// Whether `index` is the deepest encoder layer (or beyond it).
    pub fn is_last_layer(&self, index: u32) -> bool {
        index >= self.encoder_layers.saturating_sub(1)
    }

    /// The layer read after `index`, or `None` past the deepest layer.
    pub fn next_layer(&self, index: u32) -> Option<u32> {
        if self.is_last_layer(index) {
            None
        } else {
            index.checked_add(1)
        }
    }

    /// Classes that are expected to be read right after `class`.
    pub fn successors(&self, class: LayerClass) -> Vec<LayerClass> {
        match class {
            LayerClass::Config => vec![LayerClass::Embedding],
            LayerClass::Embedding => vec![LayerClass::EncoderLayer(0)],
            LayerClass::EncoderLayer(n) => match self.next_layer(n) {
                Some(next) => vec![LayerClass::EncoderLayer(next)],
                None => Self::terminal_classes().to_vec(),
            },
            LayerClass::Pooler => vec![LayerClass::Classifier],
            LayerClass::Classifier
            | LayerClass::OutputHead
            | LayerClass::Checkpoint
            | LayerClass::Other => Vec::new(),
        }
    }

    /// Classes that follow the deepest encoder layer.
    pub fn terminal_classes() -> [LayerClass; 3] {
        [LayerClass::Pooler, LayerClass::Classifier, LayerClass::OutputHead]
    }
}

/// Ordered name ↔ class table of known objects.
///
/// Seeded from configuration and extended with every name a tier has
/// served. The first registered name of a class represents that class.
#[derive(Debug, Clone, Default)]
pub struct LayerNamespace {
    entries: Vec<(String, LayerClass)>,
    known: HashSet<String>,
}

impl LayerNamespace {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ns = Self::default();
        for name in names {
            ns.register(name.as_ref());
        }
        ns
    }

    /// Add a name if it is not known yet. Returns true if it was added.
    pub fn register(&mut self, name: &str) -> bool {
        if name.is_empty() || self.known.contains(name) {
            return false;
        }
        self.known.insert(name.to_string());
        self.entries.push((name.to_string(), classify(name)));
        true
    }

    /// The representative name for a class.
    pub fn name_for(&self, class: LayerClass) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, c)| *c == class)
            .map(|(name, _)| name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_families() {
        assert_eq!(classify("embedding.bin"), LayerClass::Embedding);
        assert_eq!(classify("word_emb.safetensors"), LayerClass::Embedding);
        assert_eq!(classify("pooler.bin"), LayerClass::Pooler);
        assert_eq!(classify("classifier.bin"), LayerClass::Classifier);
        assert_eq!(classify("output.bin"), LayerClass::OutputHead);
        assert_eq!(classify("lm_head.bin"), LayerClass::OutputHead);
        assert_eq!(classify("config.json"), LayerClass::Config);
        assert_eq!(classify("tokenizer.yaml"), LayerClass::Config);
        assert_eq!(classify("checkpoint_v2.ckpt"), LayerClass::Checkpoint);
        assert_eq!(classify("layer0"), LayerClass::EncoderLayer(0));
        assert_eq!(classify("LAYER12.bin"), LayerClass::EncoderLayer(12));
        assert_eq!(classify("encoder.layers.7.weight"), LayerClass::EncoderLayer(7));
        assert_eq!(classify("vocab.txt"), LayerClass::Other);
        assert_eq!(classify(""), LayerClass::Other);
    }

    #[test]
    fn test_classify_rule_order() {
        // Embedding wins over layer index; config wins over checkpoint.
        assert_eq!(classify("layer0_embedding.bin"), LayerClass::Embedding);
        assert_eq!(classify("checkpoint_config.json"), LayerClass::Config);
        // "layer" without digits is not positional.
        assert_eq!(classify("layernorm.bin"), LayerClass::Other);
    }

    #[test]
    fn test_emb_must_be_a_whole_token() {
        assert_eq!(classify("emb.bin"), LayerClass::Embedding);
        assert_eq!(classify("tok-emb-0.bin"), LayerClass::Embedding);
        assert_eq!(classify("word_embeddings.bin"), LayerClass::Embedding);
        assert_eq!(classify("member.bin"), LayerClass::Other);
        assert_eq!(classify("assembly_layer2.bin"), LayerClass::EncoderLayer(2));
        assert_eq!(classify("embossed.bin"), LayerClass::Other);
    }

    #[test]
    fn test_policy_keys() {
        assert_eq!(LayerClass::EncoderLayer(3).policy_key(), "layer3");
        assert_eq!(LayerClass::Pooler.policy_key(), "output");
        assert_eq!(LayerClass::OutputHead.policy_key(), "output");
        assert_eq!(LayerClass::Other.policy_key(), "other");
    }

    #[test]
    fn test_class_string_round_trip() {
        for class in [
            LayerClass::Config,
            LayerClass::EncoderLayer(11),
            LayerClass::OutputHead,
            LayerClass::Other,
        ] {
            assert_eq!(class.to_string().parse::<LayerClass>(), Ok(class));
        }
        assert!("encoder_layer_x".parse::<LayerClass>().is_err());
    }

    #[test]
    fn test_with_layer_index() {
        assert_eq!(with_layer_index("layer0.bin", 1).as_deref(), Some("layer1.bin"));
        assert_eq!(
            with_layer_index("encoder.layer.9.weight", 10).as_deref(),
            Some("encoder.layer.10.weight")
        );
        assert_eq!(with_layer_index("Layer_3.BIN", 4).as_deref(), Some("Layer_4.BIN"));
        assert_eq!(with_layer_index("pooler.bin", 1), None);
    }

    #[test]
    fn test_dependency_graph() {
        let graph = DependencyGraph::new(4);
        assert_eq!(graph.successors(LayerClass::Config), vec![LayerClass::Embedding]);
        assert_eq!(
            graph.successors(LayerClass::Embedding),
            vec![LayerClass::EncoderLayer(0)]
        );
        assert_eq!(
            graph.successors(LayerClass::EncoderLayer(2)),
            vec![LayerClass::EncoderLayer(3)]
        );
        assert_eq!(
            graph.successors(LayerClass::EncoderLayer(3)),
            DependencyGraph::terminal_classes().to_vec()
        );
        assert!(graph.successors(LayerClass::OutputHead).is_empty());
    }

    #[test]
    fn test_largest_layer_index_is_terminal() {
        assert_eq!(classify("layer4294967295.bin"), LayerClass::EncoderLayer(u32::MAX));

        let graph = DependencyGraph::new(4);
        assert!(graph.is_last_layer(u32::MAX));
        assert_eq!(graph.next_layer(u32::MAX), None);
        assert_eq!(
            graph.successors(LayerClass::EncoderLayer(u32::MAX)),
            DependencyGraph::terminal_classes().to_vec()
        );

        let deep = DependencyGraph::new(u32::MAX);
        assert_eq!(deep.next_layer(u32::MAX - 2), Some(u32::MAX - 1));
        assert_eq!(deep.next_layer(u32::MAX - 1), None);
        assert!(DependencyGraph::new(0).is_last_layer(0));
    }

    #[test]
    fn test_namespace_first_name_wins() {
        let mut ns = LayerNamespace::new(["layer0.bin", "embedding.bin"]);
        assert!(!ns.register("layer0.bin"));
        assert!(ns.register("encoder.layer.0.weight"));
        assert_eq!(ns.name_for(LayerClass::EncoderLayer(0)), Some("layer0.bin"));
        assert_eq!(ns.name_for(LayerClass::Pooler), None);
        assert_eq!(ns.len(), 3);
    }
}
