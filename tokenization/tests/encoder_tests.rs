//! Integration tests for the text encoder
//!
//! These tests write a minimal WordPiece tokenizer.json into a temp dir so
//! nothing has to be downloaded.

use rinfer_common::TokenizerDescriptor;
use rinfer_tokenization::{TextEncoder, TokenizationError};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const PAD: u32 = 0;
const UNK: u32 = 1;
const CLS: u32 = 2;
const SEP: u32 = 3;

/// Vocab: [PAD] [UNK] [CLS] [SEP] hello world a b c d e f g h i j
fn create_test_tokenizer() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let tokenizer_path = temp_dir.path().join("tokenizer.json");

    let tokenizer_json = r###"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [
    {"id": 0, "content": "[PAD]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 1, "content": "[UNK]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 2, "content": "[CLS]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 3, "content": "[SEP]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
  ],
  "normalizer": {
    "type": "Sequence",
    "normalizers": [
      {"type": "NFD"},
      {"type": "Lowercase"},
      {"type": "StripAccents"}
    ]
  },
  "pre_tokenizer": {
    "type": "Whitespace"
  },
  "post_processor": {
    "type": "TemplateProcessing",
    "single": [
      {"SpecialToken": {"id": "[CLS]", "type_id": 0}},
      {"Sequence": {"id": "A", "type_id": 0}},
      {"SpecialToken": {"id": "[SEP]", "type_id": 0}}
    ],
    "pair": [
      {"SpecialToken": {"id": "[CLS]", "type_id": 0}},
      {"Sequence": {"id": "A", "type_id": 0}},
      {"SpecialToken": {"id": "[SEP]", "type_id": 0}},
      {"Sequence": {"id": "B", "type_id": 1}},
      {"SpecialToken": {"id": "[SEP]", "type_id": 1}}
    ],
    "special_tokens": {
      "[CLS]": {"id": "[CLS]", "ids": [2], "tokens": ["[CLS]"]},
      "[SEP]": {"id": "[SEP]", "ids": [3], "tokens": ["[SEP]"]}
    }
  },
  "decoder": {
    "type": "WordPiece",
    "prefix": "##",
    "cleanup": true
  },
  "model": {
    "type": "WordPiece",
    "unk_token": "[UNK]",
    "continuing_subword_prefix": "##",
    "max_input_chars_per_word": 100,
    "vocab": {
      "[PAD]": 0,
      "[UNK]": 1,
      "[CLS]": 2,
      "[SEP]": 3,
      "hello": 4,
      "world": 5,
      "a": 6,
      "b": 7,
      "c": 8,
      "d": 9,
      "e": 10,
      "f": 11,
      "g": 12,
      "h": 13,
      "i": 14,
      "j": 15
    }
  }
}"###;

    fs::write(&tokenizer_path, tokenizer_json).expect("Failed to write tokenizer.json");

    (temp_dir, tokenizer_path)
}

fn encoder_with_window(path: &PathBuf, max_len: usize) -> TextEncoder {
    let descriptor = TokenizerDescriptor::new(path);
    TextEncoder::from_file(&descriptor, max_len).expect("Failed to build encoder")
}

#[test]
fn loads_tokenizer_from_file() {
    let (_temp_dir, path) = create_test_tokenizer();
    let descriptor = TokenizerDescriptor::new(&path);
    assert!(TextEncoder::from_file(&descriptor, 32).is_ok());
}

#[test]
fn missing_tokenizer_file_is_load_error() {
    let descriptor = TokenizerDescriptor::new("no_such_tokenizer.json");
    match TextEncoder::from_file(&descriptor, 32) {
        Err(TokenizationError::LoadFailed(_)) => {}
        other => panic!("Expected LoadFailed, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn zero_window_is_rejected() {
    let (_temp_dir, path) = create_test_tokenizer();
    let descriptor = TokenizerDescriptor::new(&path);
    match TextEncoder::from_file(&descriptor, 0) {
        Err(TokenizationError::InvalidInput(_)) => {}
        other => panic!("Expected InvalidInput, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn encodes_with_template_specials() {
    let (_temp_dir, path) = create_test_tokenizer();
    let encoder = encoder_with_window(&path, 32);

    let seq = encoder.encode("hello world").expect("encode failed");
    assert_eq!(seq.ids, vec![CLS, 4, 5, SEP]);
    assert_eq!(seq.attention_mask, vec![1, 1, 1, 1]);
    assert!(!seq.truncated);
    assert_eq!(seq.source_chars, 11);
}

#[test]
fn mask_len_matches_ids_and_sums_to_len() {
    let (_temp_dir, path) = create_test_tokenizer();
    let encoder = encoder_with_window(&path, 32);

    for text in ["hello", "hello world", "a b c d e"] {
        let seq = encoder.encode(text).expect("encode failed");
        assert_eq!(seq.attention_mask.len(), seq.ids.len());
        let sum: u32 = seq.attention_mask.iter().sum();
        assert_eq!(sum as usize, seq.len());
    }
}

#[test]
fn empty_input_encodes_to_specials_only() {
    let (_temp_dir, path) = create_test_tokenizer();
    let encoder = encoder_with_window(&path, 32);

    let seq = encoder.encode("").expect("empty input must encode");
    assert_eq!(seq.ids, vec![CLS, SEP]);
    assert!(!seq.truncated);
    assert_eq!(seq.source_chars, 0);
}

#[test]
fn truncation_keeps_closing_special() {
    let (_temp_dir, path) = create_test_tokenizer();
    let encoder = encoder_with_window(&path, 8);

    // 10 word tokens + [CLS]/[SEP] template = 12, window is 8.
    let seq = encoder.encode("a b c d e f g h i j").expect("encode failed");
    assert_eq!(seq.len(), 8);
    assert!(seq.truncated);
    assert_eq!(seq.ids, vec![CLS, 6, 7, 8, 9, 10, 11, SEP]);
    assert_eq!(seq.attention_mask, vec![1; 8]);
}

#[test]
fn truncation_without_closing_special_cuts_tail() {
    let (_temp_dir, path) = create_test_tokenizer();
    // Override eos so the template's [SEP] no longer counts as closing.
    let descriptor = TokenizerDescriptor::new(&path).with_eos_id(99);
    let encoder = TextEncoder::from_file(&descriptor, 8).expect("Failed to build encoder");

    let seq = encoder.encode("a b c d e f g h i j").expect("encode failed");
    assert_eq!(seq.len(), 8);
    assert!(seq.truncated);
    assert_eq!(seq.ids, vec![CLS, 6, 7, 8, 9, 10, 11, 12]);
}

#[test]
fn exact_window_fit_is_not_truncated() {
    let (_temp_dir, path) = create_test_tokenizer();
    let encoder = encoder_with_window(&path, 8);

    // 6 words + 2 specials = exactly 8.
    let seq = encoder.encode("a b c d e f").expect("encode failed");
    assert_eq!(seq.len(), 8);
    assert!(!seq.truncated);
}

#[test]
fn decode_skips_special_tokens() {
    let (_temp_dir, path) = create_test_tokenizer();
    let encoder = encoder_with_window(&path, 32);

    let seq = encoder.encode("hello world").expect("encode failed");
    let text = encoder.decode(&seq.ids).expect("decode failed");
    assert!(text.contains("hello"));
    assert!(text.contains("world"));
    assert!(!text.contains("[CLS]"));
    assert!(!text.contains("[SEP]"));
}

#[test]
fn unknown_words_map_to_unk() {
    let (_temp_dir, path) = create_test_tokenizer();
    let encoder = encoder_with_window(&path, 32);

    let seq = encoder.encode("hello zebra").expect("encode failed");
    assert!(seq.ids.contains(&UNK));
}

#[test]
fn all_ids_stay_below_vocab_size() {
    let (_temp_dir, path) = create_test_tokenizer();
    let encoder = encoder_with_window(&path, 32);
    let vocab = encoder.vocab_size() as u32;
    assert_eq!(vocab, 16);

    let seq = encoder.encode("hello unknown j").expect("encode failed");
    assert!(seq.ids.iter().all(|&id| id < vocab));
}

#[test]
fn special_ids_discovered_from_vocab() {
    let (_temp_dir, path) = create_test_tokenizer();
    let encoder = encoder_with_window(&path, 32);

    assert_eq!(encoder.pad_id(), PAD);
    assert_eq!(encoder.bos_id(), Some(CLS));
    assert_eq!(encoder.eos_id(), Some(SEP));
    assert_eq!(encoder.unk_id(), Some(UNK));
}

#[test]
fn descriptor_overrides_win_over_discovery() {
    let (_temp_dir, path) = create_test_tokenizer();
    let descriptor = TokenizerDescriptor::new(&path)
        .with_pad_id(7)
        .with_eos_id(9);
    let encoder = TextEncoder::from_file(&descriptor, 32).expect("Failed to build encoder");

    assert_eq!(encoder.pad_id(), 7);
    assert_eq!(encoder.eos_id(), Some(9));
    // Untouched ids still come from discovery.
    assert_eq!(encoder.bos_id(), Some(CLS));
}
