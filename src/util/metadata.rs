// Copyright (c) 2020-2021 MobileCoin Inc.

//! Transaction metadata handling: merging a plain-text message file into
//! the metadata JSON under label 674, with 64-byte line splitting.

/// Label under which wallet-readable messages are attached.
pub const MESSAGE_METADATA_LABEL: &str = "674";

/// Maximum byte length of a single metadata string value.
pub const MAX_METADATA_MESSAGE_BYTES: usize = 64;

/// Re-wraps message lines so that every line fits in `max_bytes` bytes,
/// splitting first at word granularity and falling back to character
/// granularity for words longer than a whole line. Overflow continues on
/// the following line.
pub fn adjust_metadata_message(metadata_message: &[String], max_bytes: usize) -> Vec<String> {
    let mut queue: Vec<String> = metadata_message.to_vec();
    let mut adjusted = Vec::new();

    let mut line_index = 0;
    while line_index < queue.len() {
        let message_line = queue[line_index].clone();
        if message_line.len() <= max_bytes {
            adjusted.push(message_line);
        } else {
            let mut adjusted_line_list: Vec<String> = Vec::new();
            let mut extras_list: Vec<String> = Vec::new();
            let mut limit_reached = false;
            for message_word in message_line.split(' ') {
                let candidate = join_candidate(&adjusted_line_list, message_word);
                if candidate.len() <= max_bytes {
                    adjusted_line_list.push(message_word.to_string());
                } else if !limit_reached {
                    // Word does not fit as a whole; take the longest char
                    // prefix that does and push the rest onto the next line.
                    let mut fitting_end = 0;
                    for (offset, character) in message_word.char_indices() {
                        let end = offset + character.len_utf8();
                        let candidate = join_candidate(&adjusted_line_list, &message_word[..end]);
                        if candidate.len() <= max_bytes {
                            fitting_end = end;
                        } else {
                            limit_reached = true;
                            break;
                        }
                    }
                    if fitting_end > 0 {
                        adjusted_line_list.push(message_word[..fitting_end].to_string());
                    }
                    extras_list.push(message_word[fitting_end..].to_string());
                } else {
                    extras_list.push(message_word.to_string());
                }
            }
            adjusted.push(adjusted_line_list.join(" "));
            if !extras_list.is_empty() {
                queue.insert(line_index + 1, extras_list.join(" "));
            }
        }
        line_index += 1;
    }

    adjusted
}

fn join_candidate(parts: &[String], next: &str) -> String {
    if parts.is_empty() {
        next.to_string()
    } else {
        format!("{} {}", parts.join(" "), next)
    }
}

/// Merges the message lines into the metadata JSON under
/// [`MESSAGE_METADATA_LABEL`], creating the object when absent.
pub fn merge_message_into_metadata(
    metadata: Option<serde_json::Value>,
    message_lines: &[String],
) -> serde_json::Value {
    let mut metadata = match metadata {
        Some(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    let adjusted = adjust_metadata_message(message_lines, MAX_METADATA_MESSAGE_BYTES);
    metadata.insert(
        MESSAGE_METADATA_LABEL.to_string(),
        serde_json::json!({ "msg": adjusted }),
    );
    serde_json::Value::Object(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|line| line.to_string()).collect()
    }

    #[test]
    fn short_lines_pass_through() {
        let message = lines(&["hello world", "second line"]);
        assert_eq!(adjust_metadata_message(&message, 64), message);
    }

    #[test]
    fn long_lines_split_at_word_boundaries() {
        let message = lines(&["aaaa bbbb cccc dddd"]);
        let adjusted = adjust_metadata_message(&message, 10);
        assert_eq!(adjusted, lines(&["aaaa bbbb", "cccc dddd"]));
        for line in &adjusted {
            assert!(line.len() <= 10);
        }
    }

    #[test]
    fn oversized_words_split_at_character_boundaries() {
        let message = lines(&["abcdefghijklmnop"]);
        let adjusted = adjust_metadata_message(&message, 10);
        assert_eq!(adjusted, lines(&["abcdefghij", "klmnop"]));
    }

    #[test]
    fn every_output_line_is_bounded() {
        let message = lines(&[
            "a somewhat longer message line that will definitely not fit in one go",
            "short",
        ]);
        for line in adjust_metadata_message(&message, 16) {
            assert!(line.len() <= 16, "line too long: {}", line);
        }
    }

    #[test]
    fn message_merges_under_label_674() {
        let metadata = serde_json::json!({"1337": {"name": "hello world"}});
        let merged = merge_message_into_metadata(Some(metadata), &lines(&["hi there"]));
        assert_eq!(merged["1337"]["name"], "hello world");
        assert_eq!(merged[MESSAGE_METADATA_LABEL]["msg"][0], "hi there");
    }
}
