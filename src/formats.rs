use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_CATEGORY: &str = "Other";
pub const UNKNOWN: &str = "Unknown";
pub const ERROR: &str = "Error";

/// A scraped post or video exactly as the dataset API returned it.
///
/// Post datasets carry `text`/`time`, video datasets carry `title`/`date`. Only those
/// fields and `url` are interpreted; everything else passes through untouched, so the
/// snapshot files hold the API response as-is and odd metadata never fails a parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(Value);

impl Item {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn url(&self) -> &str {
        self.str_field("url").unwrap_or("")
    }

    pub fn text(&self) -> Option<&str> {
        self.str_field("text")
    }

    pub fn title(&self) -> Option<&str> {
        self.str_field("title")
    }

    /// Body used for classification: `text` when it has content, else `title`.
    pub fn content(&self) -> &str {
        match self.text() {
            Some(text) if !text.trim().is_empty() => text,
            _ => self.title().unwrap_or(""),
        }
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.str_field("time").or_else(|| self.str_field("date"))
    }

    pub fn channel(&self) -> &str {
        self.str_field("channelName")
            .or_else(|| self.str_field("channel"))
            .unwrap_or("")
    }

    /// First of `keys` holding a number; anything else (`"1.2K"`, null, absent) is 0.
    fn count(&self, keys: &[&str]) -> u64 {
        keys.iter()
            .find_map(|key| {
                let value = self.0.get(*key)?;
                value
                    .as_u64()
                    .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            })
            .unwrap_or(0)
    }

    pub fn views(&self) -> u64 {
        self.count(&["viewCount", "views"])
    }

    pub fn likes(&self) -> u64 {
        self.count(&["likes", "likeCount"])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub category: String,
    pub subject: String,
}

impl Label {
    pub fn new(category: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            subject: subject.into(),
        }
    }

    /// Used when the content is empty or the model output cannot be understood.
    pub fn fallback() -> Self {
        Self::new(DEFAULT_CATEGORY, UNKNOWN)
    }

    /// Used when the completion API rejects the request.
    pub fn error() -> Self {
        Self::new(ERROR, ERROR)
    }
}

/// One entry of the label store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledItem {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(alias = "type", default = "unknown")]
    pub category: String,
    #[serde(default = "unknown")]
    pub subject: String,
    #[serde(default)]
    pub text: String,
}

fn unknown() -> String {
    UNKNOWN.to_owned()
}

impl LabeledItem {
    pub fn from_item(item: &Item, label: Label) -> Self {
        Self {
            url: item.url().to_owned(),
            title: item.title().unwrap_or_default().to_owned(),
            channel: item.channel().to_owned(),
            date: item.timestamp().unwrap_or_default().to_owned(),
            views: item.views(),
            likes: item.likes(),
            category: label.category,
            subject: label.subject,
            text: item.text().unwrap_or_default().to_owned(),
        }
    }

    /// Anchor text for links: the title, or the url when the title is blank.
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_and_post_shapes_share_one_item_type() -> anyhow::Result<()> {
        let video: Item = serde_json::from_str(
            r#"{"url":"v1","title":"Cell biology","date":"2024-02-01T00:00:00Z","channelName":"Bio","viewCount":10,"likes":2}"#,
        )?;
        assert_eq!(video.content(), "Cell biology");
        assert_eq!(video.timestamp(), Some("2024-02-01T00:00:00Z"));
        assert_eq!(video.channel(), "Bio");
        assert_eq!(video.views(), 10);

        let post: Item = serde_json::from_str(
            r#"{"url":"p1","text":"Exam tips","time":"2024-03-01T00:00:00Z","type":"Post","shares":4}"#,
        )?;
        assert_eq!(post.content(), "Exam tips");
        assert_eq!(serde_json::to_value(&post)?["shares"], 4);
        Ok(())
    }

    #[test]
    fn metadata_is_read_loosely_and_written_back_unchanged() -> anyhow::Result<()> {
        let raw = serde_json::json!([
            {"url":"a","views":10,"channel":"C"},
            {"url":"b","likes":"1.2K","viewCount":1200.0,"channelName":"A","channel":"B"},
            {"url":"c","time":17040672,"likes":null},
            "not an object"
        ]);
        let items: Vec<Item> = serde_json::from_value(raw.clone())?;

        assert_eq!((items[0].channel(), items[0].views()), ("C", 10));
        assert_eq!(
            (items[1].channel(), items[1].views(), items[1].likes()),
            ("A", 1200, 0)
        );
        assert_eq!(items[2].timestamp(), None);
        assert_eq!(items[3].url(), "");

        assert_eq!(serde_json::to_value(&items)?, raw);
        Ok(())
    }

    #[test]
    fn blank_text_falls_back_to_title() {
        let item = Item::new(serde_json::json!({"url": "u", "text": "   ", "title": "Title"}));
        assert_eq!(item.content(), "Title");
    }

    #[test]
    fn labeled_item_takes_loose_metadata() {
        let item = Item::new(serde_json::json!({
            "url": "u", "text": "t", "date": "2024-01-01", "views": "many", "likes": 3
        }));
        let labeled = LabeledItem::from_item(&item, Label::new("Exam", "Biology"));
        assert_eq!(labeled.views, 0);
        assert_eq!(labeled.likes, 3);
        assert_eq!(labeled.date, "2024-01-01");
        assert_eq!(labeled.title, "");
    }

    #[test]
    fn labeled_item_accepts_legacy_type_key() -> anyhow::Result<()> {
        let item: LabeledItem =
            serde_json::from_str(r#"{"url":"a","type":"Exam","subject":"Biology"}"#)?;
        assert_eq!(item.category, "Exam");
        assert_eq!(item.subject, "Biology");
        assert_eq!(item.display_title(), "a");
        Ok(())
    }
}
