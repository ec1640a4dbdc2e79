// ABOUTME: Filesystem media store with a fixed per-profile directory layout
// ABOUTME: Profile image, QR code, gallery and audio items under uploads/{profile}/

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::types::ObjectId;

const IMAGE_DIR: &str = "image";
const QR_DIR: &str = "QR";
const GALLERY_DIR: &str = "multimedia/gallery";
const AUDIO_DIR: &str = "multimedia/audio";
const QR_FILE: &str = "qr-code.png";

/// One uploaded file as received from a multipart request.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn profile_dir(&self, profile_id: &ObjectId) -> PathBuf {
        self.root.join(profile_id.as_str())
    }

    /// Creates the empty layout for a new profile. Called once, at creation.
    pub async fn provision(&self, profile_id: &ObjectId) -> Result<()> {
        let dir = self.profile_dir(profile_id);
        for sub in [IMAGE_DIR, QR_DIR, GALLERY_DIR, AUDIO_DIR] {
            fs::create_dir_all(dir.join(sub)).await?;
        }
        Ok(())
    }

    /// Stores a new profile image under a fresh timestamp-based name and
    /// removes the previous file, so exactly one image exists afterwards and
    /// its URL never repeats (no stale client caches).
    pub async fn set_profile_image(
        &self,
        profile_id: &ObjectId,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String> {
        let mime = content_type.to_lowercase();
        if !mime.starts_with("image/") {
            return Err(AppError::Validation(format!(
                "profile image must be an image, got {}",
                content_type
            )));
        }

        let image_dir = self.profile_dir(profile_id).join(IMAGE_DIR);
        fs::create_dir_all(&image_dir).await?;

        let previous = list_files(&image_dir).await?;

        // Replacements inside the same millisecond must still get a new name.
        let mut millis = chrono::Utc::now().timestamp_millis();
        let ext = extension_for(&mime);
        let mut filename = format!("profile_{}.{}", millis, ext);
        while previous.contains(&filename) {
            millis += 1;
            filename = format!("profile_{}.{}", millis, ext);
        }
        write_atomic(&image_dir.join(&filename), bytes).await?;

        for old in previous {
            fs::remove_file(image_dir.join(&old)).await?;
        }

        Ok(filename)
    }

    /// Filename of the single current profile image, if one has been stored.
    pub async fn current_image(&self, profile_id: &ObjectId) -> Result<Option<String>> {
        let image_dir = self.profile_dir(profile_id).join(IMAGE_DIR);
        if !image_dir.is_dir() {
            return Ok(None);
        }
        Ok(list_files(&image_dir).await?.into_iter().next())
    }

    /// Gallery accepts images and mp4 video only. The whole batch is staged
    /// first and committed only if every item validates and writes cleanly, so
    /// a bad item leaves nothing behind.
    pub async fn add_gallery_items(
        &self,
        profile_id: &ObjectId,
        items: &[MediaItem],
    ) -> Result<()> {
        for item in items {
            let mime = item.content_type.to_lowercase();
            if !(mime.starts_with("image/") || mime == "video/mp4") {
                return Err(AppError::Validation(format!(
                    "file '{}' is not a valid gallery item",
                    item.filename
                )));
            }
        }
        self.stage_and_commit(profile_id, GALLERY_DIR, items).await
    }

    pub async fn add_audio_items(&self, profile_id: &ObjectId, items: &[MediaItem]) -> Result<()> {
        for item in items {
            if !item.content_type.to_lowercase().starts_with("audio/") {
                return Err(AppError::Validation(format!(
                    "file '{}' is not a valid audio item",
                    item.filename
                )));
            }
        }
        self.stage_and_commit(profile_id, AUDIO_DIR, items).await
    }

    async fn stage_and_commit(
        &self,
        profile_id: &ObjectId,
        target: &str,
        items: &[MediaItem],
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let profile_dir = self.profile_dir(profile_id);
        let target_dir = profile_dir.join(target);
        fs::create_dir_all(&target_dir).await?;

        let staging = profile_dir.join(format!(".staging-{}", Uuid::new_v4()));
        fs::create_dir_all(&staging).await?;

        let result = async {
            for item in items {
                let name = sanitize_filename(&item.filename)?;
                fs::write(staging.join(&name), &item.bytes).await?;
            }
            for item in items {
                let name = sanitize_filename(&item.filename)?;
                fs::rename(staging.join(&name), target_dir.join(&name)).await?;
            }
            Ok(())
        }
        .await;

        let _ = fs::remove_dir_all(&staging).await;
        result
    }

    /// Deletes one file under the profile's tree. The relative path comes from
    /// the client, so anything but plain path components is rejected.
    pub async fn delete_item(&self, profile_id: &ObjectId, relative_path: &str) -> Result<()> {
        let relative = Path::new(relative_path);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(AppError::Validation(format!(
                "invalid media path: {}",
                relative_path
            )));
        }

        let full = self.profile_dir(profile_id).join(relative);
        if full.is_file() {
            fs::remove_file(full).await?;
            Ok(())
        } else {
            Err(AppError::NotFound(format!(
                "media item {} for profile {}",
                relative_path, profile_id
            )))
        }
    }

    /// Relative paths of current gallery files, order unspecified.
    pub async fn list_gallery(&self, profile_id: &ObjectId) -> Result<Vec<String>> {
        self.list_relative(profile_id, GALLERY_DIR).await
    }

    pub async fn list_audio(&self, profile_id: &ObjectId) -> Result<Vec<String>> {
        self.list_relative(profile_id, AUDIO_DIR).await
    }

    async fn list_relative(&self, profile_id: &ObjectId, sub: &str) -> Result<Vec<String>> {
        let dir = self.profile_dir(profile_id).join(sub);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        Ok(list_files(&dir)
            .await?
            .into_iter()
            .map(|name| format!("{}/{}", sub, name))
            .collect())
    }

    /// Removes the entire media tree for a profile.
    pub async fn delete_all(&self, profile_id: &ObjectId) -> Result<()> {
        let dir = self.profile_dir(profile_id);
        if dir.is_dir() {
            fs::remove_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Renders a QR code for the profile deep link and overwrites the fixed QR
    /// file. The payload is stable per profile, so this is idempotent and safe
    /// to retry.
    pub async fn generate_and_store_qr(
        &self,
        profile_id: &ObjectId,
        deep_link: &str,
    ) -> Result<()> {
        let png = render_qr_png(deep_link)?;
        let qr_dir = self.profile_dir(profile_id).join(QR_DIR);
        fs::create_dir_all(&qr_dir).await?;
        write_atomic(&qr_dir.join(QR_FILE), &png).await
    }

    pub async fn qr_exists(&self, profile_id: &ObjectId) -> bool {
        self.profile_dir(profile_id).join(QR_DIR).join(QR_FILE).is_file()
    }

    pub fn qr_relative_path(&self) -> String {
        format!("{}/{}", QR_DIR, QR_FILE)
    }

    pub fn image_relative_path(&self, filename: &str) -> String {
        format!("{}/{}", IMAGE_DIR, filename)
    }
}

/// Public deep link encoded into the QR image.
pub fn deep_link(base_url: &str, profile_id: &ObjectId) -> String {
    format!("{}/ser-querido/{}", base_url, profile_id)
}

/// Absolute URL into the public read path for one stored file.
pub fn media_url(base_url: &str, profile_id: &ObjectId, relative: &str) -> String {
    format!("{}/uploads/{}/{}", base_url, profile_id, relative)
}

fn sanitize_filename(filename: &str) -> Result<String> {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::Validation(format!("invalid filename: {}", filename)))?;
    Ok(name.to_string())
}

fn extension_for(mime: &str) -> &str {
    match mime {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

async fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

/// Writes to a temp path in the same directory and renames into place, so a
/// client disconnect mid-write never leaves a corrupt visible file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| AppError::Storage(format!("no parent directory for {}", path.display())))?;
    let tmp = dir.join(format!(".tmp-{}", Uuid::new_v4()));

    fs::write(&tmp, bytes).await?;
    if let Err(err) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    Ok(())
}

/// Scales the module matrix up and adds a quiet zone, then encodes as
/// grayscale PNG.
fn render_qr_png(payload: &str) -> Result<Vec<u8>> {
    const SCALE: u32 = 8;
    const MARGIN: u32 = 4; // modules of quiet zone

    let code = qrcode::QrCode::with_error_correction_level(payload.as_bytes(), qrcode::EcLevel::Q)
        .map_err(|e| AppError::Storage(format!("QR encoding failed: {}", e)))?;

    let width = code.width() as u32;
    let colors = code.to_colors();
    let side = (width + 2 * MARGIN) * SCALE;

    let img = image::GrayImage::from_fn(side, side, |x, y| {
        let mx = (x / SCALE).checked_sub(MARGIN);
        let my = (y / SCALE).checked_sub(MARGIN);
        let dark = match (mx, my) {
            (Some(mx), Some(my)) if mx < width && my < width => {
                colors[(my * width + mx) as usize] == qrcode::Color::Dark
            }
            _ => false,
        };
        if dark { image::Luma([0u8]) } else { image::Luma([255u8]) }
    });

    let mut png = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut png),
        image::ImageFormat::Png,
    )
    .map_err(|e| AppError::Storage(format!("QR image write failed: {}", e)))?;
    Ok(png)
}
