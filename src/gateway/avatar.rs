//! Generated avatar URLs for users and agents without an uploaded image.

const AVATAR_BASE_URL: &str = "https://api.dicebear.com/9.x";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarStyle {
    Initials,
    BotttsNeutral,
}

impl AvatarStyle {
    fn path(&self) -> &'static str {
        match self {
            AvatarStyle::Initials => "initials",
            AvatarStyle::BotttsNeutral => "bottts-neutral",
        }
    }
}

pub fn avatar_url(style: AvatarStyle, seed: &str) -> String {
    let base = format!("{}/{}/svg", AVATAR_BASE_URL, style.path());
    let mut params = vec![("seed", seed)];
    if style == AvatarStyle::Initials {
        params.push(("fontWeight", "500"));
        params.push(("fontSize", "42"));
    }

    match reqwest::Url::parse_with_params(&base, &params) {
        Ok(url) => url.to_string(),
        Err(_) => base,
    }
}
