// ============================================================
// Layer 3 — Alphabet and Label Codec
// ============================================================
// A captcha label is a fixed-length string of L characters
// drawn from an alphabet of K characters. The model sees it as
// a flat vector of L segments, each K long, with exactly one
// 1.0 per segment:
//
//   alphabet = "abc", L = 2, label = "ca"
//   segment 0 ('c') → [0, 0, 1]
//   segment 1 ('a') → [1, 0, 0]
//   vector          → [0, 0, 1, 1, 0, 0]
//
// Decoding takes the arg-max of every segment, so it recovers
// L characters from any vector of the right length, including
// raw model logits.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::error::{CaptchaError, Result};

/// Ordered set of characters a label may contain.
/// The position of a character is its class index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Alphabet {
    chars: Vec<char>,
    #[serde(skip)]
    index: HashMap<char, usize>,
}

impl Alphabet {
    /// Build an alphabet from a string of distinct characters.
    pub fn new(chars: &str) -> Result<Self> {
        let chars: Vec<char> = chars.chars().collect();
        if chars.is_empty() {
            return Err(CaptchaError::config("alphabet must not be empty"));
        }

        let mut index = HashMap::with_capacity(chars.len());
        for (i, &c) in chars.iter().enumerate() {
            if index.insert(c, i).is_some() {
                return Err(CaptchaError::config(format!(
                    "alphabet contains '{c}' more than once"
                )));
            }
        }
        Ok(Self { chars, index })
    }

    /// Number of classes per label position (K).
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn index_of(&self, c: char) -> Option<usize> {
        self.index.get(&c).copied()
    }

    pub fn char_at(&self, i: usize) -> Option<char> {
        self.chars.get(i).copied()
    }

    pub fn as_string(&self) -> String {
        self.chars.iter().collect()
    }
}

impl TryFrom<String> for Alphabet {
    type Error = CaptchaError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(&s)
    }
}

impl From<Alphabet> for String {
    fn from(a: Alphabet) -> Self {
        a.as_string()
    }
}

/// Index of the largest value; ties go to the lowest index.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Converts between label strings and their one-hot vectors.
#[derive(Debug, Clone)]
pub struct LabelCodec {
    alphabet:    Alphabet,
    max_captcha: usize,
}

impl LabelCodec {
    pub fn new(alphabet: Alphabet, max_captcha: usize) -> Self {
        Self { alphabet, max_captcha }
    }

    /// Length of one encoded label, L × K.
    pub fn vector_len(&self) -> usize {
        self.max_captcha * self.alphabet.len()
    }

    /// Encode `text` as a flat one-hot vector of length L × K.
    ///
    /// A label shorter than L leaves its trailing segments at zero.
    pub fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let k = self.alphabet.len();
        let mut vector = vec![0.0f32; self.vector_len()];

        for (pos, c) in text.chars().enumerate() {
            if pos >= self.max_captcha {
                return Err(CaptchaError::Label {
                    label:  text.to_string(),
                    reason: format!("longer than {} characters", self.max_captcha),
                });
            }
            let class = self.alphabet.index_of(c).ok_or_else(|| CaptchaError::Label {
                label:  text.to_string(),
                reason: format!("character '{c}' is not in the alphabet"),
            })?;
            vector[pos * k + class] = 1.0;
        }
        Ok(vector)
    }

    /// Decode L segments by per-segment arg-max.
    pub fn decode(&self, vector: &[f32]) -> Result<String> {
        self.class_indices(vector)?
            .into_iter()
            .map(|i| {
                self.alphabet
                    .char_at(i)
                    .ok_or_else(|| CaptchaError::Model(format!("class index {i} out of range")))
            })
            .collect()
    }

    /// Per-segment arg-max class indices, L of them.
    pub fn class_indices(&self, vector: &[f32]) -> Result<Vec<usize>> {
        if vector.len() != self.vector_len() {
            return Err(CaptchaError::Model(format!(
                "expected a label vector of length {}, got {}",
                self.vector_len(),
                vector.len()
            )));
        }
        Ok(vector.chunks(self.alphabet.len()).map(argmax).collect())
    }
}
