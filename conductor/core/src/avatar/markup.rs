//! Speech markup with embedded renderer events
//!
//! ```text
//! <speak>[prelude events]TEXT[trailing events]</speak>
//! event := <ue4event><type>T</type><data>D</data></ue4event>
//! ```
//!
//! Intents play before the text (a greeting gesture), widgets after it.

use std::fmt;

/// Event type used for intent gestures
pub const INTENT_EVENT_TYPE: &str = "ka_intent";

#[derive(Clone, Debug, PartialEq)]
struct MarkupEvent {
    event_type: String,
    data: String,
}

impl MarkupEvent {
    fn render(&self, out: &mut String) {
        out.push_str("<ue4event><type>");
        out.push_str(&escape(&self.event_type));
        out.push_str("</type><data>");
        out.push_str(&self.data);
        out.push_str("</data></ue4event>");
    }
}

/// Builder for `<speak>` markup
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpeechMarkup {
    prelude: Vec<MarkupEvent>,
    text: String,
    trailer: Vec<MarkupEvent>,
}

impl SpeechMarkup {
    /// Markup that speaks `text`
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Play an intent gesture before the text
    #[must_use]
    pub fn with_intent(mut self, intent: &str) -> Self {
        self.prelude.push(MarkupEvent {
            event_type: INTENT_EVENT_TYPE.to_string(),
            data: format!("<{INTENT_EVENT_TYPE}>{}</{INTENT_EVENT_TYPE}>", escape(intent)),
        });
        self
    }

    /// Show a widget after the text; `data` is embedded as JSON
    #[must_use]
    pub fn with_widget(mut self, widget_type: &str, data: &serde_json::Value) -> Self {
        self.trailer.push(MarkupEvent {
            event_type: widget_type.to_string(),
            data: escape(&data.to_string()),
        });
        self
    }

    /// Render the markup
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("<speak>");
        for event in &self.prelude {
            event.render(&mut out);
        }
        out.push_str(&escape(&self.text));
        for event in &self.trailer {
            event.render(&mut out);
        }
        out.push_str("</speak>");
        out
    }
}

impl fmt::Display for SpeechMarkup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_plain_text() {
        assert_eq!(SpeechMarkup::new("你好").render(), "<speak>你好</speak>");
    }

    #[test]
    fn test_widget_after_text() {
        let markup = SpeechMarkup::new("可以看图").with_widget("image", &json!({"url": "a.png"}));
        assert_eq!(
            markup.to_string(),
            "<speak>可以看图<ue4event><type>image</type><data>{\"url\":\"a.png\"}</data></ue4event></speak>"
        );
    }

    #[test]
    fn test_intent_before_text() {
        let markup = SpeechMarkup::new("同学你好").with_intent("Welcome");
        assert_eq!(
            markup.render(),
            "<speak><ue4event><type>ka_intent</type><data><ka_intent>Welcome</ka_intent></data></ue4event>同学你好</speak>"
        );
    }

    #[test]
    fn test_text_is_escaped() {
        assert_eq!(
            SpeechMarkup::new("a<b & c>d").render(),
            "<speak>a&lt;b &amp; c&gt;d</speak>"
        );
    }
}
