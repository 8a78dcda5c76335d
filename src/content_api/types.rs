use crate::db::models::{AssignmentUpsert, ChapterUpsert, CourseUpsert, Granularity, NewSegment};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Some endpoints wrap lists as `{"data": [...]}`, others return a bare array.
#[derive(Debug, Deserialize)]
pub struct ListEnvelope<T> {
    pub data: Vec<T>,
}

pub fn parse_list<T>(body: &[u8]) -> Result<Vec<T>, serde_json::Error>
where
    T: for<'de> Deserialize<'de>,
{
    match serde_json::from_slice::<ListEnvelope<T>>(body) {
        Ok(envelope) => Ok(envelope.data),
        Err(_) => serde_json::from_slice::<Vec<T>>(body),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCourse {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, alias = "position")]
    pub order: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAssignment {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "position")]
    pub order: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLearningObject {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "audio")]
    pub audio_url: Option<String>,
    #[serde(default, alias = "durationSeconds")]
    pub duration: Option<f64>,
    #[serde(default, alias = "position")]
    pub order: Option<i64>,
    #[serde(default)]
    pub segments: Vec<ApiSegment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSegment {
    pub text: String,
    #[serde(alias = "startTime")]
    pub start: f64,
    #[serde(alias = "endTime")]
    pub end: f64,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl ApiCourse {
    pub fn to_upsert(&self, fallback_order: usize) -> CourseUpsert {
        CourseUpsert {
            external_id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            image_url: self.image_url.clone(),
            sort_order: self.order.unwrap_or(fallback_order as i64),
        }
    }
}

impl ApiAssignment {
    pub fn to_upsert(&self, course_id: &str, fallback_order: usize) -> AssignmentUpsert {
        AssignmentUpsert {
            external_id: self.id.clone(),
            course_id: course_id.to_string(),
            title: self.title.clone(),
            description: self.description.clone(),
            sort_order: self.order.unwrap_or(fallback_order as i64),
        }
    }
}

impl ApiLearningObject {
    pub fn to_upsert(&self, assignment_id: &str, fallback_order: usize) -> ChapterUpsert {
        ChapterUpsert {
            external_id: self.id.clone(),
            assignment_id: assignment_id.to_string(),
            title: self.title.clone(),
            description: self.description.clone(),
            audio_url: self.audio_url.clone().filter(|u| !u.trim().is_empty()),
            duration_secs: self.duration,
            sort_order: self.order.unwrap_or(fallback_order as i64),
        }
    }

    /// Well-formed segments only; windows with `end < start` are dropped.
    pub fn new_segments(&self) -> Vec<NewSegment> {
        self.segments
            .iter()
            .filter(|s| s.start.is_finite() && s.end.is_finite() && s.end >= s.start)
            .map(|s| NewSegment {
                granularity: match s.kind.as_deref() {
                    Some(k) if k.eq_ignore_ascii_case("word") => Granularity::Word,
                    _ => Granularity::Sentence,
                },
                text: s.text.clone(),
                start_time: s.start,
                end_time: s.end,
            })
            .collect()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_enveloped_and_bare_lists() {
        let wrapped = br#"{"data":[{"id":7,"name":"Physics"}]}"#;
        let bare = br#"[{"id":"7","title":"Physics","order":2}]"#;

        let a: Vec<ApiCourse> = parse_list(wrapped).unwrap();
        let b: Vec<ApiCourse> = parse_list(bare).unwrap();
        assert_eq!(a[0].id, "7");
        assert_eq!(a[0].title, "Physics");
        assert_eq!(b[0].order, Some(2));
    }

    #[test]
    fn segments_default_to_sentence_and_skip_inverted_windows() {
        let obj: ApiLearningObject = serde_json::from_value(serde_json::json!({
            "id": "lo-1",
            "title": "Intro",
            "audioUrl": "https://cdn.example.com/intro.mp3",
            "segments": [
                {"text": "Hello there.", "start": 0.0, "end": 2.5},
                {"text": "Hello", "start": 0.0, "end": 0.4, "type": "word"},
                {"text": "broken", "start": 3.0, "end": 1.0}
            ]
        }))
        .unwrap();

        let segs = obj.new_segments();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].granularity, Granularity::Sentence);
        assert_eq!(segs[1].granularity, Granularity::Word);
    }
}
