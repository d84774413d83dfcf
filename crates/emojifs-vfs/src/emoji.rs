//! Emoji data model and the rules mapping it onto file names.
//!
//! Entities and collections are immutable snapshots produced by a listing
//! call. They are replaced wholesale whenever a listing is refreshed.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::time::SystemTime;

use crate::vfs::{VfsError, VfsResult};

/// Extended attribute exposing an emoji's content URL.
pub const URL_XATTR: &str = "user.url";

/// Extended attribute exposing who uploaded an emoji.
pub const CREATED_BY_XATTR: &str = "user.created_by";

/// Where an emoji's bytes live: an `http(s)` URL or an inline `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLocator(String);

impl ContentLocator {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_http(&self) -> bool {
        self.0.starts_with("http")
    }

    pub fn is_data(&self) -> bool {
        self.0.starts_with("data:")
    }

    /// File extension implied by the locator: the MIME subtype of a
    /// `data:image/...` URL, otherwise the suffix of the URL's last path
    /// segment. `jpeg` stays `jpeg`.
    pub fn extension(&self) -> Option<&str> {
        if let Some(rest) = self.0.strip_prefix("data:image/") {
            return rest.split([';', ',']).next().filter(|ext| !ext.is_empty());
        }
        if !self.is_http() {
            return None;
        }
        let path = self.0.split(['?', '#']).next()?;
        let last = path.rsplit('/').next()?;
        last.rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
    }
}

/// One remote emoji.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Unique within its collection.
    pub name: String,
    /// Backend-assigned id, if the backend has one.
    pub id: Option<String>,
    pub locator: ContentLocator,
    /// Name of the emoji this one aliases. Resolved by name on demand; the
    /// target may not exist (or may be a built-in emoji).
    pub alias_for: Option<String>,
    pub created: Option<SystemTime>,
    /// Display identity of the uploader.
    pub creator: String,
}

impl Entity {
    pub fn is_alias(&self) -> bool {
        self.alias_for.is_some()
    }

    /// `<name>.<ext>` as shown in directory listings.
    pub fn filename(&self) -> String {
        self.filename_as(&self.name)
    }

    /// A file name for `name` using this emoji's extension.
    pub fn filename_as(&self, name: &str) -> String {
        match self.locator.extension() {
            Some(ext) => format!("{}.{}", name, ext),
            None => name.to_string(),
        }
    }

    /// Symlink text for an alias: the target's synthesized file name.
    pub fn link_target(&self) -> Option<String> {
        self.alias_for.as_deref().map(|target| self.filename_as(target))
    }
}

/// A named group of emoji sharing one listing (a Slack team, a Discord guild).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub id: String,
    pub name: String,
    /// Whether the current principal may create and delete emoji here.
    pub writable: bool,
}

impl Collection {
    /// Directory name: the display name with `/` replaced by `_`.
    pub fn dir_name(&self) -> String {
        self.name.replace('/', "_")
    }
}

/// Map a file name to the emoji name it refers to: everything before the
/// first `.`.
pub fn entity_name(filename: &str) -> &str {
    filename.split('.').next().unwrap_or(filename)
}

/// Image types accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Gif,
    Jpeg,
}

impl ImageFormat {
    /// Parse an extension, case-insensitively. `jpg` and `jpeg` are both JPEG.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    /// Format of a file about to be created.
    pub fn from_filename(filename: &str) -> VfsResult<Self> {
        filename
            .rsplit_once('.')
            .and_then(|(_, ext)| Self::from_extension(ext))
            .ok_or_else(|| {
                VfsError::invalid_argument(format!(
                    "{}: extension must be one of png, gif, jpg, jpeg",
                    filename
                ))
            })
    }

    pub fn mime_subtype(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Jpeg => "jpeg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Jpeg => "image/jpeg",
        }
    }

    /// Inline `data:` URL carrying `data` in this format.
    pub fn data_url(&self, data: &[u8]) -> String {
        format!("data:{};base64,{}", self.mime_type(), BASE64.encode(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, locator: &str) -> Entity {
        Entity {
            name: name.to_string(),
            id: None,
            locator: ContentLocator::new(locator),
            alias_for: None,
            created: None,
            creator: String::new(),
        }
    }

    #[test]
    fn test_extension_from_url() {
        let loc = ContentLocator::new("https://emoji.slack-edge.com/T01/parrot/abc123.gif");
        assert_eq!(loc.extension(), Some("gif"));

        let loc = ContentLocator::new("https://cdn.example/e/1.png?size=64");
        assert_eq!(loc.extension(), Some("png"));

        let loc = ContentLocator::new("https://cdn.example/v1.2/noext");
        assert_eq!(loc.extension(), None);
    }

    #[test]
    fn test_extension_from_data_url() {
        let loc = ContentLocator::new("data:image/jpeg;base64,AAAA");
        assert_eq!(loc.extension(), Some("jpeg"));

        let loc = ContentLocator::new("data:image/png,raw");
        assert_eq!(loc.extension(), Some("png"));

        assert_eq!(ContentLocator::new("alias:parrot").extension(), None);
    }

    #[test]
    fn test_filenames() {
        let e = entity("parrot", "https://cdn/parrot.gif");
        assert_eq!(e.filename(), "parrot.gif");
        assert_eq!(e.link_target(), None);

        let mut alias = entity("party", "https://cdn/parrot.gif");
        alias.alias_for = Some("parrot".into());
        assert!(alias.is_alias());
        assert_eq!(alias.filename(), "party.gif");
        assert_eq!(alias.link_target().as_deref(), Some("parrot.gif"));
    }

    #[test]
    fn test_dir_name_replaces_slash() {
        let c = Collection {
            id: "1".into(),
            name: "rust/gamedev".into(),
            writable: false,
        };
        assert_eq!(c.dir_name(), "rust_gamedev");
    }

    #[test]
    fn test_entity_name() {
        assert_eq!(entity_name("parrot.gif"), "parrot");
        assert_eq!(entity_name("parrot"), "parrot");
        assert_eq!(entity_name("a.b.png"), "a");
    }

    #[test]
    fn test_image_format() {
        assert_eq!(ImageFormat::from_extension("JPG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_extension("jpeg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_extension("bmp"), None);
        assert_eq!(ImageFormat::Jpeg.mime_subtype(), "jpeg");

        assert_eq!(ImageFormat::from_filename("x.gif").unwrap(), ImageFormat::Gif);
        assert!(matches!(
            ImageFormat::from_filename("x.bmp"),
            Err(VfsError::InvalidArgument(_))
        ));
        assert!(ImageFormat::from_filename("noext").is_err());
    }

    #[test]
    fn test_data_url() {
        assert_eq!(ImageFormat::Png.data_url(b"hi"), "data:image/png;base64,aGk=");
    }
}
