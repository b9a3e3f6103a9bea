use serde::Deserialize;

/// One unit of content on a device, deserialized from search responses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub recording_id: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub duration: Option<u64>,
    /// Bytes the device estimates for the recording.
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub drm: Option<Drm>,
    #[serde(default)]
    pub start_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drm {
    #[serde(default)]
    pub copy_protected: bool,
}

impl Recording {
    /// Copy-protected recordings cannot be archived; the device refuses the
    /// transfer.
    pub fn copy_protected(&self) -> bool {
        self.drm.as_ref().is_some_and(|drm| drm.copy_protected)
    }

    /// Filesystem- and URL-safe stem derived from the title.
    pub fn file_stem(&self) -> String {
        let stem = self
            .title
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect::<String>();

        if stem.chars().all(|c| c == '_') {
            format!("recording-{}", self.recording_id)
        } else {
            stem
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recording(value: serde_json::Value) -> Recording {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn deserializes_from_a_search_row() {
        let recording = recording(json!({
            "recordingId": "tivo:rc.1234",
            "title": "Evening News",
            "duration": 1800,
            "size": 2_400_000_000u64,
            "drm": { "copyProtected": false },
        }));

        assert_eq!(recording.recording_id, "tivo:rc.1234");
        assert_eq!(recording.duration, Some(1800));
        assert!(!recording.copy_protected());
    }

    #[test]
    fn missing_drm_block_means_unprotected() {
        let recording = recording(json!({
            "recordingId": "tivo:rc.1",
            "title": "x",
        }));

        assert!(!recording.copy_protected());
    }

    #[test]
    fn file_stem_replaces_unsafe_characters() {
        let recording = recording(json!({
            "recordingId": "tivo:rc.77",
            "title": "News at 9: Late/Edition",
        }));

        assert_eq!(recording.file_stem(), "News_at_9__Late_Edition");
    }

    #[test]
    fn unusable_title_falls_back_to_the_identifier() {
        let recording = recording(json!({
            "recordingId": "tivo:rc.77",
            "title": "???",
        }));

        assert_eq!(recording.file_stem(), "recording-tivo:rc.77");
    }
}
