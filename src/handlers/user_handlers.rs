//! HTTP handlers for user records, upload ownership and dataset descriptions.
//!
//! Route and field names follow what the web client already sends, hence the
//! camelCase paths.

use crate::{errors::AppError, models::user::is_valid_username, state::AppState};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUserRequest {
    pub username: Option<String>,
    pub user_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DescriptionRequest {
    pub description: String,
}

fn message(text: &str) -> Json<Value> {
    Json(json!({ "message": text }))
}

/// `POST /adduser` — create or overwrite a user.
pub async fn add_user(
    State(state): State<AppState>,
    payload: Result<Json<AddUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let Ok(Json(AddUserRequest {
        username: Some(username),
        user_type: Some(user_type),
    })) = payload
    else {
        return Err(AppError::bad_request("username and userType are required"));
    };
    if !is_valid_username(&username) {
        return Err(AppError::bad_request(format!("invalid username `{}`", username)));
    }

    state.users.put_user(&username, &user_type).await?;
    info!("registered user {} as {}", username, user_type);
    Ok((StatusCode::CREATED, message("User added successfully")))
}

/// `GET /getUploads/{username}` — upload ids the user owns.
pub async fn get_uploads(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    let user = state.users.get_user(&username).await?;
    Ok(Json(user.map(|u| u.uploads).unwrap_or_default()))
}

/// `GET /getDownloadedSets/{username}` — upload ids the user may read.
pub async fn get_downloaded_sets(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Value>, AppError> {
    let user = state.users.get_user(&username).await?;
    let uploads = user.map(|u| u.access_uploads).unwrap_or_default();
    Ok(Json(json!({ "uploads": uploads })))
}

/// `GET /getUserType/{username}`.
///
/// Existing clients read the type from the `uploads` key; `userType`
/// carries the same value.
pub async fn get_user_type(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Value>, AppError> {
    let user_type = state
        .users
        .get_user(&username)
        .await?
        .map(|u| u.user_type);
    Ok(Json(json!({ "uploads": user_type, "userType": user_type })))
}

/// `POST /deleteSet/{username}/{filename}` — drop `<username>-<filename>`
/// from the user's uploads.
pub async fn delete_set(
    State(state): State<AppState>,
    Path((username, filename)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let upload_id = format!("{}-{}", username, filename);
    state.users.remove_upload(&username, &upload_id).await?;
    info!("removed {} from uploads of {}", upload_id, username);
    Ok(message("successfully updated"))
}

/// `POST /grantAccess/{username}/{upload_id}` — let a user read an upload.
pub async fn grant_access(
    State(state): State<AppState>,
    Path((username, upload_id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    state.users.grant_access(&username, &upload_id).await?;
    info!("granted {} read access to {}", username, upload_id);
    Ok(message("access granted"))
}

/// `GET /fetchDescription/{filename}` — `null` when the upload has none.
pub async fn fetch_description(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let record = state.users.get_upload(&upload_id).await?;
    Ok(Json(
        json!({ "description": record.map(|r| r.description) }),
    ))
}

/// `GET /updateDescription/{filename}/{description}` — kept for clients that
/// still send the description in the path.
pub async fn update_description_in_path(
    State(state): State<AppState>,
    Path((upload_id, description)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    state.users.set_description(&upload_id, &description).await?;
    Ok(message("successfully updated"))
}

/// `POST /updateDescription/{filename}` with `{"description": …}`.
pub async fn update_description(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    payload: Result<Json<DescriptionRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Ok(Json(DescriptionRequest { description })) = payload else {
        return Err(AppError::bad_request("description is required"));
    };
    state.users.set_description(&upload_id, &description).await?;
    Ok(message("successfully updated"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::object::ObjectMetadata, services::upload_service::UploadFile, state::test_state,
    };
    use bytes::Bytes;

    fn add(username: &str, user_type: &str) -> Result<Json<AddUserRequest>, JsonRejection> {
        Ok(Json(AddUserRequest {
            username: Some(username.into()),
            user_type: Some(user_type.into()),
        }))
    }

    #[tokio::test]
    async fn add_user_then_user_type_round_trips() {
        let (_dir, state) = test_state(100).await;
        let (status, Json(body)) = add_user(State(state.clone()), add("alice", "Validator"))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "User added successfully");

        let Json(body) = get_user_type(State(state.clone()), Path("alice".into()))
            .await
            .unwrap();
        assert_eq!(body["uploads"], "Validator");
        assert_eq!(body["userType"], "Validator");

        let Json(body) = get_user_type(State(state), Path("nobody".into()))
            .await
            .unwrap();
        assert!(body["uploads"].is_null());
    }

    #[tokio::test]
    async fn add_user_requires_both_fields() {
        let (_dir, state) = test_state(100).await;
        let err = add_user(
            State(state),
            Ok(Json(AddUserRequest {
                username: Some("alice".into()),
                user_type: None,
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn hyphenated_users_can_register_and_upload() {
        let (_dir, state) = test_state(100).await;
        add_user(State(state.clone()), add("john-doe", "User"))
            .await
            .unwrap();
        let receipt = state
            .uploads
            .upload(
                "john-doe",
                vec![UploadFile {
                    filename: "a.png".into(),
                    bytes: Bytes::from_static(b"a"),
                }],
                &ObjectMetadata::new(),
                "",
            )
            .await
            .unwrap();

        let Json(uploads) = get_uploads(State(state.clone()), Path("john-doe".into()))
            .await
            .unwrap();
        assert_eq!(uploads, [receipt.upload_id.clone()]);

        // names the upload pipeline refuses are refused here too
        let err = add_user(State(state), add("a/b", "User")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_set_removes_listed_upload_and_reports_absent_one() {
        let (_dir, state) = test_state(100).await;
        state
            .users
            .record_upload("bob", "bob-01-03-2024-10-00-00", "")
            .await
            .unwrap();

        let Json(uploads) = get_uploads(State(state.clone()), Path("bob".into()))
            .await
            .unwrap();
        assert_eq!(uploads, ["bob-01-03-2024-10-00-00"]);

        delete_set(
            State(state.clone()),
            Path(("bob".into(), "01-03-2024-10-00-00".into())),
        )
        .await
        .unwrap();
        let Json(uploads) = get_uploads(State(state.clone()), Path("bob".into()))
            .await
            .unwrap();
        assert!(uploads.is_empty());

        let err = delete_set(
            State(state),
            Path(("bob".into(), "01-03-2024-10-00-00".into())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn access_grants_show_up_as_downloaded_sets() {
        let (_dir, state) = test_state(100).await;
        add_user(State(state.clone()), add("dave", "User"))
            .await
            .unwrap();
        grant_access(State(state.clone()), Path(("dave".into(), "bob-1".into())))
            .await
            .unwrap();

        let Json(body) = get_downloaded_sets(State(state.clone()), Path("dave".into()))
            .await
            .unwrap();
        assert_eq!(body["uploads"], json!(["bob-1"]));

        let Json(body) = get_downloaded_sets(State(state), Path("ghost".into()))
            .await
            .unwrap();
        assert_eq!(body["uploads"], json!([]));
    }

    #[tokio::test]
    async fn description_updates_are_idempotent() {
        let (_dir, state) = test_state(100).await;
        for _ in 0..2 {
            update_description_in_path(
                State(state.clone()),
                Path(("bob-1".into(), "lung scans".into())),
            )
            .await
            .unwrap();
        }
        let Json(body) = fetch_description(State(state.clone()), Path("bob-1".into()))
            .await
            .unwrap();
        assert_eq!(body["description"], "lung scans");

        update_description(
            State(state.clone()),
            Path("bob-1".into()),
            Ok(Json(DescriptionRequest {
                description: "relabelled".into(),
            })),
        )
        .await
        .unwrap();
        let Json(body) = fetch_description(State(state.clone()), Path("bob-1".into()))
            .await
            .unwrap();
        assert_eq!(body["description"], "relabelled");

        let Json(body) = fetch_description(State(state), Path("missing".into()))
            .await
            .unwrap();
        assert!(body["description"].is_null());
    }
}
