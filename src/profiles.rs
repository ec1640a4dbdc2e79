// ABOUTME: HTTP handlers for memorial profiles, their media tree, and relation edges
// ABOUTME: Reads are anonymous; every mutation passes the owner-or-admin guard first

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Host, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;

use crate::AppState;
use crate::auth::{Claims, base_url, require_can_act};
use crate::error::{AppError, Result};
use crate::media::{self, MediaItem};
use crate::types::*;

// Multipart plumbing

struct ProfileUpload {
    fields: HashMap<String, String>,
    image: Option<MediaItem>,
    multimedia: Vec<MediaItem>,
}

async fn read_profile_upload(mut multipart: Multipart) -> Result<ProfileUpload> {
    let mut upload = ProfileUpload {
        fields: HashMap::new(),
        image: None,
        multimedia: Vec::new(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::Validation("malformed multipart request".to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match (name.as_str(), field.file_name()) {
            ("image", Some(filename)) => {
                let item = MediaItem {
                    filename: filename.to_string(),
                    content_type: field.content_type().unwrap_or_default().to_string(),
                    bytes: read_bytes(field).await?,
                };
                upload.image = Some(item);
            }
            ("multimedia", Some(filename)) => {
                let item = MediaItem {
                    filename: filename.to_string(),
                    content_type: field.content_type().unwrap_or_default().to_string(),
                    bytes: read_bytes(field).await?,
                };
                upload.multimedia.push(item);
            }
            _ => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::Validation("malformed multipart request".to_string()))?;
                upload.fields.insert(name, value);
            }
        }
    }

    Ok(upload)
}

async fn read_bytes(field: axum::extract::multipart::Field<'_>) -> Result<Vec<u8>> {
    Ok(field
        .bytes()
        .await
        .map_err(|_| AppError::Validation("malformed multipart request".to_string()))?
        .to_vec())
}

fn required_field<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    fields
        .get(name)
        .map(|s| s.as_str())
        .ok_or_else(|| AppError::Validation(format!("missing field '{}'", name)))
}

fn parse_date(name: &str, value: &str) -> Result<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("'{}' must be a date (YYYY-MM-DD)", name)))
}

/// Splits a mixed multimedia batch the way the upload form sends it: images
/// and mp4 go to the gallery, audio to the audio folder. One bad file rejects
/// the request before anything is stored.
fn split_multimedia(items: Vec<MediaItem>) -> Result<(Vec<MediaItem>, Vec<MediaItem>)> {
    let mut gallery = Vec::new();
    let mut audio = Vec::new();
    for item in items {
        let mime = item.content_type.to_lowercase();
        if mime.starts_with("image/") || mime == "video/mp4" {
            gallery.push(item);
        } else if mime.starts_with("audio/") {
            audio.push(item);
        } else {
            return Err(AppError::Validation(format!(
                "file '{}' is not an allowed multimedia type",
                item.filename
            )));
        }
    }
    Ok((gallery, audio))
}

// Profile handlers

/// Creation runs the full sequence: record, media tree, profile image,
/// multimedia, QR, ownership link — each step needs the one before it.
pub async fn create_profile(
    State(state): State<AppState>,
    claims: Claims,
    Host(host): Host,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ProfileView>)> {
    let upload = read_profile_upload(multipart).await?;
    let image = upload
        .image
        .as_ref()
        .ok_or_else(|| AppError::Validation("a profile image is required".to_string()))?;
    if !image.content_type.to_lowercase().starts_with("image/") {
        return Err(AppError::Validation(
            "the profile image must be an image".to_string(),
        ));
    }
    let (gallery, audio) = split_multimedia(upload.multimedia.clone())?;

    let fields = &upload.fields;
    let profile = state
        .storage
        .create_profile(
            required_field(fields, "name")?,
            required_field(fields, "gender")?,
            parse_date("birth_date", required_field(fields, "birth_date")?)?,
            required_field(fields, "birth_place")?,
            parse_date("death_date", required_field(fields, "death_date")?)?,
            required_field(fields, "death_place")?,
            fields.get("biography").map(|s| s.as_str()).unwrap_or(""),
        )
        .await?;

    state.media.provision(&profile.id).await?;
    state
        .media
        .set_profile_image(&profile.id, &image.bytes, &image.content_type)
        .await?;
    state.media.add_gallery_items(&profile.id, &gallery).await?;
    state.media.add_audio_items(&profile.id, &audio).await?;

    let base = base_url(&host, &headers);
    state
        .media
        .generate_and_store_qr(&profile.id, &media::deep_link(&base, &profile.id))
        .await?;

    let owner = ObjectId::parse(&claims.sub)?;
    state.storage.add_ownership(&owner, &profile.id).await?;

    let view = build_view(&state, &base, profile).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Host(host): Host,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ProfileView>> {
    let id = ObjectId::parse(&id)?;
    let profile = state.storage.get_profile(&id).await?;
    let view = build_view(&state, &base_url(&host, &headers), profile).await?;
    Ok(Json(view))
}

pub async fn list_profiles(
    State(state): State<AppState>,
    Host(host): Host,
    headers: HeaderMap,
) -> Result<Json<Vec<ProfileSummary>>> {
    let base = base_url(&host, &headers);
    let mut summaries = Vec::new();
    for profile in state.storage.list_profiles().await? {
        summaries.push(build_summary(&state, &base, profile).await?);
    }
    Ok(Json(summaries))
}

pub async fn my_profiles(
    State(state): State<AppState>,
    claims: Claims,
    Host(host): Host,
    headers: HeaderMap,
) -> Result<Json<Vec<ProfileSummary>>> {
    let owner = ObjectId::parse(&claims.sub)?;
    let ids = state.storage.owned_profile_ids(&owner).await?;
    let base = base_url(&host, &headers);

    let mut summaries = Vec::new();
    for profile in state.storage.profiles_by_ids(&ids).await? {
        summaries.push(build_summary(&state, &base, profile).await?);
    }
    Ok(Json(summaries))
}

pub async fn search_profiles(
    State(state): State<AppState>,
    Path(term): Path<String>,
) -> Result<Json<SearchResponse>> {
    let results = state
        .storage
        .search_profiles(&term)
        .await?
        .into_iter()
        .map(|p| SearchMatch {
            id: p.id,
            name: p.name,
        })
        .collect();

    Ok(Json(SearchResponse { results }))
}

pub async fn update_field(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
    Json(req): Json<UpdateFieldRequest>,
) -> Result<StatusCode> {
    let id = ObjectId::parse(&id)?;
    require_can_act(&state, &claims, &id).await?;

    let field = UpdatableField::parse(&req.field, &req.value)?;
    state.storage.update_profile_field(&id, &field).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_image(
    State(state): State<AppState>,
    claims: Claims,
    Host(host): Host,
    headers: HeaderMap,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<ImageUpdatedResponse>> {
    let id = ObjectId::parse(&id)?;
    require_can_act(&state, &claims, &id).await?;

    let items = read_file_fields(multipart).await?;
    let item = items
        .first()
        .ok_or_else(|| AppError::Validation("no file was provided".to_string()))?;

    let filename = state
        .media
        .set_profile_image(&id, &item.bytes, &item.content_type)
        .await?;

    let base = base_url(&host, &headers);
    Ok(Json(ImageUpdatedResponse {
        message: "profile image updated".to_string(),
        image_url: media::media_url(&base, &id, &state.media.image_relative_path(&filename)),
    }))
}

#[derive(Debug, Deserialize)]
pub struct MultimediaKind {
    pub kind: String,
}

pub async fn add_multimedia(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
    Query(query): Query<MultimediaKind>,
    multipart: Multipart,
) -> Result<StatusCode> {
    let id = ObjectId::parse(&id)?;
    require_can_act(&state, &claims, &id).await?;

    let items = read_file_fields(multipart).await?;
    match query.kind.as_str() {
        "gallery" => state.media.add_gallery_items(&id, &items).await?,
        "audio" => state.media.add_audio_items(&id, &items).await?,
        other => {
            return Err(AppError::Validation(format!(
                "unknown multimedia kind '{}'",
                other
            )));
        }
    }

    Ok(StatusCode::OK)
}

async fn read_file_fields(mut multipart: Multipart) -> Result<Vec<MediaItem>> {
    let mut items = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::Validation("malformed multipart request".to_string()))?
    {
        if let Some(filename) = field.file_name() {
            let filename = filename.to_string();
            let content_type = field.content_type().unwrap_or_default().to_string();
            items.push(MediaItem {
                filename,
                content_type,
                bytes: read_bytes(field).await?,
            });
        }
    }
    Ok(items)
}

#[derive(Debug, Deserialize)]
pub struct MediaPath {
    pub path: String,
}

pub async fn delete_multimedia(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
    Query(query): Query<MediaPath>,
) -> Result<StatusCode> {
    let id = ObjectId::parse(&id)?;
    require_can_act(&state, &claims, &id).await?;

    state.media.delete_item(&id, &query.path).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn generate_qr(
    State(state): State<AppState>,
    claims: Claims,
    Host(host): Host,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = ObjectId::parse(&id)?;
    require_can_act(&state, &claims, &id).await?;

    let base = base_url(&host, &headers);
    state
        .media
        .generate_and_store_qr(&id, &media::deep_link(&base, &id))
        .await?;

    Ok(StatusCode::OK)
}

/// Deletes the record, the whole media subtree, and the ownership rows.
/// Relation edges referencing the profile are deliberately left dangling
/// (DESIGN.md).
pub async fn delete_profile(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = ObjectId::parse(&id)?;
    require_can_act(&state, &claims, &id).await?;

    state.media.delete_all(&id).await?;
    state.storage.delete_profile(&id).await?;
    state.storage.remove_ownership_of_profile(&id).await?;

    Ok(StatusCode::NO_CONTENT)
}

// Relation handlers

pub async fn add_relation(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
    Json(req): Json<RelationRequest>,
) -> Result<(StatusCode, Json<Relation>)> {
    let id = ObjectId::parse(&id)?;
    require_can_act(&state, &claims, &id).await?;

    let relation = state.storage.create_relation(&req).await?;
    Ok((StatusCode::CREATED, Json(relation)))
}

pub async fn get_relations(
    State(state): State<AppState>,
    Host(host): Host,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<RelationView>>> {
    let id = ObjectId::parse(&id)?;
    let base = base_url(&host, &headers);

    let mut views = Vec::new();
    for relation in state.storage.relations_for(&id).await? {
        // The label facing the queried profile and whoever is on the other end.
        let (label, other_id) = if relation.first_id == id {
            (relation.first_to_second.clone(), relation.second_id.clone())
        } else {
            (relation.second_to_first.clone(), relation.first_id.clone())
        };

        let related = match state.storage.get_profile(&other_id).await {
            Ok(profile) => {
                let image_url = current_image_url(&state, &base, &profile.id).await?;
                Some(RelatedProfile {
                    id: profile.id,
                    name: profile.name,
                    gender: profile.gender,
                    death_date: profile.death_date,
                    image_url,
                })
            }
            // Dangling edge: the endpoint was deleted but the edge kept.
            Err(AppError::NotFound(_)) => None,
            Err(other) => return Err(other),
        };

        views.push(RelationView {
            id: relation.id,
            label,
            related,
        });
    }

    Ok(Json(views))
}

pub async fn update_relation(
    State(state): State<AppState>,
    claims: Claims,
    Path((id, relation_id)): Path<(String, String)>,
    Json(req): Json<RelationRequest>,
) -> Result<Json<Relation>> {
    let id = ObjectId::parse(&id)?;
    let relation_id = ObjectId::parse(&relation_id)?;
    require_can_act(&state, &claims, &id).await?;

    state.storage.update_relation(&relation_id, &req).await?;
    let relation = state.storage.get_relation(&relation_id).await?;
    Ok(Json(relation))
}

pub async fn delete_relation(
    State(state): State<AppState>,
    claims: Claims,
    Path((id, relation_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let id = ObjectId::parse(&id)?;
    let relation_id = ObjectId::parse(&relation_id)?;
    require_can_act(&state, &claims, &id).await?;

    state.storage.delete_relation(&relation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// View assembly

async fn current_image_url(
    state: &AppState,
    base: &str,
    profile_id: &ObjectId,
) -> Result<Option<String>> {
    Ok(state.media.current_image(profile_id).await?.map(|filename| {
        media::media_url(base, profile_id, &state.media.image_relative_path(&filename))
    }))
}

async fn qr_url(state: &AppState, base: &str, profile_id: &ObjectId) -> Option<String> {
    if state.media.qr_exists(profile_id).await {
        Some(media::media_url(
            base,
            profile_id,
            &state.media.qr_relative_path(),
        ))
    } else {
        None
    }
}

async fn build_view(state: &AppState, base: &str, profile: Profile) -> Result<ProfileView> {
    let image_url = current_image_url(state, base, &profile.id).await?;
    let qr_url = qr_url(state, base, &profile.id).await;

    let gallery_files = state
        .media
        .list_gallery(&profile.id)
        .await?
        .into_iter()
        .map(|rel| media::media_url(base, &profile.id, &rel))
        .collect();
    let audio_files = state
        .media
        .list_audio(&profile.id)
        .await?
        .into_iter()
        .map(|rel| media::media_url(base, &profile.id, &rel))
        .collect();

    Ok(ProfileView {
        id: profile.id,
        name: profile.name,
        gender: profile.gender,
        birth_date: profile.birth_date,
        birth_place: profile.birth_place,
        death_date: profile.death_date,
        death_place: profile.death_place,
        biography: profile.biography,
        image_url,
        qr_url,
        gallery_files,
        audio_files,
    })
}

async fn build_summary(state: &AppState, base: &str, profile: Profile) -> Result<ProfileSummary> {
    let image_url = current_image_url(state, base, &profile.id).await?;
    let qr_url = qr_url(state, base, &profile.id).await;

    Ok(ProfileSummary {
        id: profile.id,
        name: profile.name,
        death_date: profile.death_date,
        image_url,
        qr_url,
    })
}
