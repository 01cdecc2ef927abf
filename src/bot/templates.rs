use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::db::models::{Guest, Hotel};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// Values available to message templates as `{{ name }}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: HashMap<&'static str, String>,
}

impl TemplateContext {
    pub fn for_guest(hotel: &Hotel, guest: &Guest) -> Self {
        let mut context = Self::default();
        context.set("hotel_name", hotel.name.clone());
        context.set(
            "guest_name",
            guest.name.clone().unwrap_or_else(|| "Guest".to_string()),
        );
        if let Some(room) = &guest.room_number {
            context.set("room_number", room.clone());
        }
        if let Some(check_in) = guest.check_in_date {
            context.set("check_in", check_in.format("%Y-%m-%d").to_string());
        }
        if let Some(check_out) = guest.check_out_date {
            context.set("check_out", check_out.format("%Y-%m-%d").to_string());
        }
        context
    }

    pub fn set(&mut self, key: &'static str, value: impl Into<String>) {
        self.values.insert(key, value.into());
    }
}

/// Substitutes known placeholders. Unknown ones are left untouched so a typo
/// in a template is visible in the sent message rather than silently dropped.
pub fn render(template: &str, context: &TemplateContext) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            context
                .values
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
