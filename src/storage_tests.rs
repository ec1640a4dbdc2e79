// ABOUTME: Comprehensive tests for the storage layer
// ABOUTME: Tests user accounts, ownership links, profiles, relations, and search

#[cfg(test)]
mod tests {
    use super::super::error::AppError;
    use super::super::storage::*;
    use super::super::types::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    async fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let storage = Storage::new(&db_url).await.unwrap();
        (storage, temp_dir)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn create_test_profile(storage: &Storage, name: &str) -> Profile {
        storage
            .create_profile(
                name,
                "female",
                date(1931, 4, 2),
                "Springfield",
                date(2012, 9, 18),
                "Portland",
                "A life well lived.",
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_user_creation_and_lookup() {
        let (storage, _temp_dir) = create_test_storage().await;

        let roles = vec!["comun".to_string()];
        let user = storage
            .create_user("Ada Lovelace", "ada@example.com", "secret1", &roles, false)
            .await
            .unwrap();

        assert_eq!(user.username, "ada");
        assert!(!user.email_confirmed);

        let by_id = storage.get_user(&user.id).await.unwrap();
        assert_eq!(by_id.email, "ada@example.com");

        let by_email = storage.get_user_by_email("ada@example.com").await.unwrap();
        assert_eq!(by_email.unwrap().id, user.id);

        let by_username = storage.get_user_by_username("ada").await.unwrap();
        assert_eq!(by_username.unwrap().id, user.id);

        assert_eq!(storage.roles_for(&user.id).await.unwrap(), roles);
    }

    #[tokio::test]
    async fn test_username_collision_appends_counter() {
        let (storage, _temp_dir) = create_test_storage().await;
        let roles = vec!["comun".to_string()];

        let first = storage
            .create_user("Foo One", "foo@a.com", "secret1", &roles, false)
            .await
            .unwrap();
        let second = storage
            .create_user("Foo Two", "foo@b.com", "secret1", &roles, false)
            .await
            .unwrap();
        let third = storage
            .create_user("Foo Three", "foo@c.com", "secret1", &roles, false)
            .await
            .unwrap();

        assert_eq!(first.username, "foo");
        assert_eq!(second.username, "foo1");
        assert_eq!(third.username, "foo2");
    }

    #[tokio::test]
    async fn test_duplicate_email_is_rejected() {
        let (storage, _temp_dir) = create_test_storage().await;
        let roles = vec!["comun".to_string()];

        storage
            .create_user("Ada", "ada@example.com", "secret1", &roles, false)
            .await
            .unwrap();
        let err = storage
            .create_user("Other Ada", "ada@example.com", "secret2", &roles, false)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_password_verification() {
        let (storage, _temp_dir) = create_test_storage().await;

        let user = storage
            .create_user("Ada", "ada@example.com", "secret1", &[], false)
            .await
            .unwrap();

        assert!(storage.verify_password(&user, "secret1").unwrap());
        assert!(!storage.verify_password(&user, "wrong").unwrap());
    }

    #[tokio::test]
    async fn test_user_not_found() {
        let (storage, _temp_dir) = create_test_storage().await;

        let missing = ObjectId::generate();
        assert!(matches!(
            storage.get_user(&missing).await.unwrap_err(),
            AppError::NotFound(_)
        ));
        assert!(storage
            .get_user_by_email("nobody@example.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_user_update_and_email_confirmation() {
        let (storage, _temp_dir) = create_test_storage().await;

        let user = storage
            .create_user("Ada", "ada@example.com", "secret1", &[], false)
            .await
            .unwrap();

        storage
            .update_user(&user.id, Some("Countess Ada"), None)
            .await
            .unwrap();
        storage.set_email_confirmed(&user.id).await.unwrap();

        let updated = storage.get_user(&user.id).await.unwrap();
        assert_eq!(updated.display_name, "Countess Ada");
        assert_eq!(updated.email, "ada@example.com");
        assert!(updated.email_confirmed);

        // Cannot take another user's email
        storage
            .create_user("Bob", "bob@example.com", "secret1", &[], false)
            .await
            .unwrap();
        let err = storage
            .update_user(&user.id, None, Some("bob@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_password_reset_updates_hash() {
        let (storage, _temp_dir) = create_test_storage().await;

        let user = storage
            .create_user("Ada", "ada@example.com", "secret1", &[], false)
            .await
            .unwrap();
        storage.set_password(&user.id, "newsecret").await.unwrap();

        let updated = storage.get_user(&user.id).await.unwrap();
        assert!(storage.verify_password(&updated, "newsecret").unwrap());
        assert!(!storage.verify_password(&updated, "secret1").unwrap());
    }

    #[tokio::test]
    async fn test_user_deletion_keeps_owned_profiles() {
        let (storage, _temp_dir) = create_test_storage().await;

        let user = storage
            .create_user("Ada", "ada@example.com", "secret1", &[], false)
            .await
            .unwrap();
        let profile = create_test_profile(&storage, "Jane Doe").await;
        storage.add_ownership(&user.id, &profile.id).await.unwrap();

        storage.delete_user(&user.id).await.unwrap();

        assert!(matches!(
            storage.get_user(&user.id).await.unwrap_err(),
            AppError::NotFound(_)
        ));
        // The profile itself is not cascaded away.
        assert_eq!(storage.get_profile(&profile.id).await.unwrap().name, "Jane Doe");
    }

    #[tokio::test]
    async fn test_ownership_links() {
        let (storage, _temp_dir) = create_test_storage().await;

        let user = storage
            .create_user("Ada", "ada@example.com", "secret1", &[], false)
            .await
            .unwrap();
        let profile = create_test_profile(&storage, "Jane Doe").await;

        assert!(!storage.is_owner(&user.id, &profile.id).await.unwrap());

        storage.add_ownership(&user.id, &profile.id).await.unwrap();
        assert!(storage.is_owner(&user.id, &profile.id).await.unwrap());
        assert_eq!(
            storage.owned_profile_ids(&user.id).await.unwrap(),
            vec![profile.id.clone()]
        );

        storage.remove_ownership_of_profile(&profile.id).await.unwrap();
        assert!(!storage.is_owner(&user.id, &profile.id).await.unwrap());
        assert!(storage.owned_profile_ids(&user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_profile_crud() {
        let (storage, _temp_dir) = create_test_storage().await;

        let profile = create_test_profile(&storage, "Jane Doe").await;
        assert_eq!(profile.id.as_str().len(), 24);

        let fetched = storage.get_profile(&profile.id).await.unwrap();
        assert_eq!(fetched.name, "Jane Doe");
        assert_eq!(fetched.birth_date, date(1931, 4, 2));

        let all = storage.list_profiles().await.unwrap();
        assert_eq!(all.len(), 1);

        storage.delete_profile(&profile.id).await.unwrap();
        assert!(matches!(
            storage.get_profile(&profile.id).await.unwrap_err(),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            storage.delete_profile(&profile.id).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_update_profile_field() {
        let (storage, _temp_dir) = create_test_storage().await;
        let profile = create_test_profile(&storage, "Jane Doe").await;

        storage
            .update_profile_field(&profile.id, &UpdatableField::Name("Jane Q. Doe".to_string()))
            .await
            .unwrap();
        storage
            .update_profile_field(&profile.id, &UpdatableField::DeathDate(date(2013, 1, 1)))
            .await
            .unwrap();

        let updated = storage.get_profile(&profile.id).await.unwrap();
        assert_eq!(updated.name, "Jane Q. Doe");
        assert_eq!(updated.death_date, date(2013, 1, 1));

        let missing = ObjectId::generate();
        assert!(matches!(
            storage
                .update_profile_field(&missing, &UpdatableField::Biography("x".to_string()))
                .await
                .unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_profiles_by_ids_skips_dangling_entries() {
        let (storage, _temp_dir) = create_test_storage().await;

        let jane = create_test_profile(&storage, "Jane Doe").await;
        let missing = ObjectId::generate();

        let profiles = storage
            .profiles_by_ids(&[jane.id.clone(), missing])
            .await
            .unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].id, jane.id);
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_substring() {
        let (storage, _temp_dir) = create_test_storage().await;

        create_test_profile(&storage, "Jane Doe").await;
        create_test_profile(&storage, "John Smith").await;

        let matches = storage.search_profiles("jan").await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "Jane Doe");

        let matches = storage.search_profiles("SMITH").await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "John Smith");
    }

    #[tokio::test]
    async fn test_search_with_blank_term_matches_nothing() {
        let (storage, _temp_dir) = create_test_storage().await;
        create_test_profile(&storage, "Jane Doe").await;

        assert!(storage.search_profiles("").await.unwrap().is_empty());
        assert!(storage.search_profiles("   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_relations_by_either_endpoint() {
        let (storage, _temp_dir) = create_test_storage().await;

        let jane = create_test_profile(&storage, "Jane Doe").await;
        let john = create_test_profile(&storage, "John Doe").await;
        let mary = create_test_profile(&storage, "Mary Doe").await;

        let relation = storage
            .create_relation(&RelationRequest {
                first_id: jane.id.clone(),
                second_id: john.id.clone(),
                first_to_second: "mother".to_string(),
                second_to_first: "son".to_string(),
            })
            .await
            .unwrap();

        let from_first = storage.relations_for(&jane.id).await.unwrap();
        let from_second = storage.relations_for(&john.id).await.unwrap();
        assert_eq!(from_first.len(), 1);
        assert_eq!(from_second.len(), 1);
        assert_eq!(from_first[0].id, relation.id);
        assert!(storage.relations_for(&mary.id).await.unwrap().is_empty());

        storage
            .update_relation(
                &relation.id,
                &RelationRequest {
                    first_id: jane.id.clone(),
                    second_id: john.id.clone(),
                    first_to_second: "grandmother".to_string(),
                    second_to_first: "grandson".to_string(),
                },
            )
            .await
            .unwrap();
        let updated = storage.get_relation(&relation.id).await.unwrap();
        assert_eq!(updated.first_to_second, "grandmother");

        storage.delete_relation(&relation.id).await.unwrap();
        assert!(matches!(
            storage.get_relation(&relation.id).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_relation_edges_survive_profile_deletion() {
        let (storage, _temp_dir) = create_test_storage().await;

        let jane = create_test_profile(&storage, "Jane Doe").await;
        let john = create_test_profile(&storage, "John Doe").await;
        storage
            .create_relation(&RelationRequest {
                first_id: jane.id.clone(),
                second_id: john.id.clone(),
                first_to_second: "mother".to_string(),
                second_to_first: "son".to_string(),
            })
            .await
            .unwrap();

        storage.delete_profile(&john.id).await.unwrap();

        // Deleting an endpoint leaves the edge in place.
        assert_eq!(storage.relations_for(&jane.id).await.unwrap().len(), 1);
    }
}
