use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;

use beneficiary_registry::logic::alignment::GroupAlignmentService;
use beneficiary_registry::model::{
    business_event, ApprovalTask, Group, GroupMembership, GroupRole, Individual, RecipientType,
    TaskStatus,
};
use beneficiary_registry::store::traits::{GroupStore, IndividualStore, TaskStore};
use beneficiary_registry::store::MemoryStore;
use beneficiary_registry::Id;

fn admin() -> Id {
    "admin".to_string()
}

async fn seed_individual(store: &MemoryStore, first: &str, last: &str) -> Individual {
    let individual = Individual::new(
        first.to_string(),
        last.to_string(),
        NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
        HashMap::new(),
        &admin(),
    );
    store.upsert_individual(individual.clone()).await.unwrap();
    individual
}

async fn seed_group(store: &MemoryStore) -> Group {
    let group = Group::new(None, &admin());
    store.upsert_group(group.clone()).await.unwrap();
    group
}

struct Fixture {
    store: Arc<MemoryStore>,
    alignment: GroupAlignmentService<MemoryStore>,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let alignment = GroupAlignmentService::new(store.clone());
    Fixture { store, alignment }
}

async fn heads(store: &MemoryStore, group_id: &Id) -> Vec<GroupMembership> {
    store
        .list_memberships_for_group(group_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| !m.is_deleted && m.role == Some(GroupRole::Head))
        .collect()
}

async fn primaries(store: &MemoryStore, group_id: &Id) -> Vec<GroupMembership> {
    store
        .list_memberships_for_group(group_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| !m.is_deleted && m.recipient_type == Some(RecipientType::Primary))
        .collect()
}

#[tokio::test]
async fn incoming_head_demotes_previous_head() {
    let f = fixture();
    let group = seed_group(&f.store).await;
    let alice = seed_individual(&f.store, "Alice", "Ba").await;
    let bob = seed_individual(&f.store, "Bob", "Ba").await;

    f.alignment
        .create_membership(
            GroupMembership::new(group.id.clone(), alice.id.clone(), Some(GroupRole::Head), &admin()),
            &admin(),
        )
        .await
        .unwrap();
    f.alignment
        .create_membership(
            GroupMembership::new(group.id.clone(), bob.id.clone(), Some(GroupRole::Head), &admin()),
            &admin(),
        )
        .await
        .unwrap();

    let current = heads(&f.store, &group.id).await;
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].individual_id, bob.id);

    let cached = f.store.get_group(&group.id).await.unwrap().unwrap();
    assert_eq!(cached.json_ext["head"], json!("Bob Ba"));
    assert_eq!(cached.json_ext["head_id"], json!(bob.id));
}

#[tokio::test]
async fn first_member_is_promoted_to_primary_and_head() {
    let f = fixture();
    let group = seed_group(&f.store).await;
    let alice = seed_individual(&f.store, "Alice", "Ba").await;

    let membership = f
        .alignment
        .create_membership(
            GroupMembership::new(group.id.clone(), alice.id.clone(), None, &admin()),
            &admin(),
        )
        .await
        .unwrap();

    assert_eq!(membership.role, Some(GroupRole::Head));
    assert_eq!(membership.recipient_type, Some(RecipientType::Primary));
}

#[tokio::test]
async fn new_primary_demotes_the_old_one() {
    let f = fixture();
    let group = seed_group(&f.store).await;
    let alice = seed_individual(&f.store, "Alice", "Ba").await;
    let bob = seed_individual(&f.store, "Bob", "Ba").await;

    f.alignment
        .create_membership(
            GroupMembership::new(group.id.clone(), alice.id.clone(), Some(GroupRole::Head), &admin()),
            &admin(),
        )
        .await
        .unwrap();
    let mut incoming =
        GroupMembership::new(group.id.clone(), bob.id.clone(), Some(GroupRole::Son), &admin());
    incoming.recipient_type = Some(RecipientType::Primary);
    f.alignment
        .create_membership(incoming, &admin())
        .await
        .unwrap();

    let current = primaries(&f.store, &group.id).await;
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].individual_id, bob.id);

    // Head is untouched by the recipient change.
    let current_heads = heads(&f.store, &group.id).await;
    assert_eq!(current_heads.len(), 1);
    assert_eq!(current_heads[0].individual_id, alice.id);
}

#[tokio::test]
async fn deleting_the_primary_promotes_a_survivor() {
    let f = fixture();
    let group = seed_group(&f.store).await;
    let alice = seed_individual(&f.store, "Alice", "Ba").await;
    let bob = seed_individual(&f.store, "Bob", "Ba").await;

    let head = f
        .alignment
        .create_membership(
            GroupMembership::new(group.id.clone(), alice.id.clone(), Some(GroupRole::Head), &admin()),
            &admin(),
        )
        .await
        .unwrap();
    f.alignment
        .create_membership(
            GroupMembership::new(group.id.clone(), bob.id.clone(), Some(GroupRole::Son), &admin()),
            &admin(),
        )
        .await
        .unwrap();

    // Alice was promoted to primary on insert; deleting her must hand both
    // head and primary to Bob.
    f.alignment.delete_membership(&head.id, &admin()).await.unwrap();

    let current = primaries(&f.store, &group.id).await;
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].individual_id, bob.id);
    let current_heads = heads(&f.store, &group.id).await;
    assert_eq!(current_heads.len(), 1);
    assert_eq!(current_heads[0].individual_id, bob.id);

    let cached = f.store.get_group(&group.id).await.unwrap().unwrap();
    let members = cached.json_ext["members"].as_object().unwrap();
    assert_eq!(members.len(), 1);
    assert!(members.contains_key(&bob.id));
    assert_eq!(cached.json_ext["primary_recipient"], json!("Bob Ba"));
}

#[tokio::test]
async fn cache_tracks_membership_mutations() {
    let f = fixture();
    let group = seed_group(&f.store).await;
    let alice = seed_individual(&f.store, "Alice", "Ba").await;
    let bob = seed_individual(&f.store, "Bob", "Ba").await;
    let cara = seed_individual(&f.store, "Cara", "Ba").await;

    for (individual, role) in [
        (&alice, Some(GroupRole::Head)),
        (&bob, Some(GroupRole::Spouse)),
        (&cara, Some(GroupRole::Daughter)),
    ] {
        f.alignment
            .create_membership(
                GroupMembership::new(group.id.clone(), individual.id.clone(), role, &admin()),
                &admin(),
            )
            .await
            .unwrap();
    }

    let cached = f.store.get_group(&group.id).await.unwrap().unwrap();
    let members = cached.json_ext["members"].as_object().unwrap();
    assert_eq!(members.len(), 3);
    assert_eq!(members[&alice.id], json!("Alice Ba"));
    assert_eq!(cached.json_ext["head"], json!("Alice Ba"));

    let memberships = f.store.list_memberships_for_group(&group.id).await.unwrap();
    let cara_membership = memberships
        .iter()
        .find(|m| m.individual_id == cara.id)
        .unwrap();
    f.alignment
        .delete_membership(&cara_membership.id, &admin())
        .await
        .unwrap();

    let cached = f.store.get_group(&group.id).await.unwrap().unwrap();
    let members = cached.json_ext["members"].as_object().unwrap();
    assert_eq!(members.len(), 2);
    assert!(!members.contains_key(&cara.id));
}

#[tokio::test]
async fn pending_review_task_blocks_membership_updates() {
    let f = fixture();
    let group = seed_group(&f.store).await;
    let alice = seed_individual(&f.store, "Alice", "Ba").await;

    let membership = f
        .alignment
        .create_membership(
            GroupMembership::new(group.id.clone(), alice.id.clone(), Some(GroupRole::Head), &admin()),
            &admin(),
        )
        .await
        .unwrap();

    let task = ApprovalTask::new(
        business_event::VALIDATION_UPLOAD_VALID_ITEMS.to_string(),
        group.id.clone(),
        json!({}),
        &admin(),
    );
    f.store.upsert_task(task.clone()).await.unwrap();

    let mut update = membership.clone();
    update.role = Some(GroupRole::Spouse);
    let err = f
        .alignment
        .update_membership(update.clone(), &admin())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("review task pending"));

    // Once the task is closed the same update goes through.
    let mut task = task;
    task.status = TaskStatus::Completed;
    f.store.upsert_task(task).await.unwrap();
    let updated = f.alignment.update_membership(update, &admin()).await.unwrap();
    assert_eq!(updated.role, Some(GroupRole::Spouse));
}

#[tokio::test]
async fn moving_a_member_into_a_new_group_realigns_both() {
    let f = fixture();
    let group = seed_group(&f.store).await;
    let alice = seed_individual(&f.store, "Alice", "Ba").await;
    let bob = seed_individual(&f.store, "Bob", "Ba").await;

    f.alignment
        .create_membership(
            GroupMembership::new(group.id.clone(), alice.id.clone(), Some(GroupRole::Head), &admin()),
            &admin(),
        )
        .await
        .unwrap();
    let bob_membership = f
        .alignment
        .create_membership(
            GroupMembership::new(group.id.clone(), bob.id.clone(), Some(GroupRole::Son), &admin()),
            &admin(),
        )
        .await
        .unwrap();

    let (new_group, moved) = f
        .alignment
        .create_group_and_move_individual(
            Some("G-9".to_string()),
            &bob_membership.id,
            &admin(),
        )
        .await
        .unwrap();

    // Bob leads the new household as its only member.
    assert_eq!(new_group.code.as_deref(), Some("G-9"));
    assert_eq!(moved.individual_id, bob.id);
    assert_eq!(moved.role, Some(GroupRole::Head));
    assert_eq!(moved.recipient_type, Some(RecipientType::Primary));
    let members = new_group.json_ext["members"].as_object().unwrap();
    assert_eq!(members.len(), 1);
    assert!(members.contains_key(&bob.id));

    // The old household keeps Alice and drops Bob's membership softly.
    let old_membership = f
        .store
        .get_membership(&bob_membership.id)
        .await
        .unwrap()
        .unwrap();
    assert!(old_membership.is_deleted);
    let old_group = f.store.get_group(&group.id).await.unwrap().unwrap();
    let old_members = old_group.json_ext["members"].as_object().unwrap();
    assert_eq!(old_members.len(), 1);
    assert!(old_members.contains_key(&alice.id));
    assert_eq!(heads(&f.store, &group.id).await.len(), 1);
    assert_eq!(primaries(&f.store, &group.id).await.len(), 1);
}

#[tokio::test]
async fn unchanged_cache_skips_group_write() {
    let f = fixture();
    let group = seed_group(&f.store).await;
    let alice = seed_individual(&f.store, "Alice", "Ba").await;

    let membership = f
        .alignment
        .create_membership(
            GroupMembership::new(group.id.clone(), alice.id.clone(), Some(GroupRole::Head), &admin()),
            &admin(),
        )
        .await
        .unwrap();
    let version_after_setup = f.store.get_group(&group.id).await.unwrap().unwrap().version;

    // Re-submitting the membership as-is derives the exact same cache, so
    // the group must not be rewritten.
    f.alignment
        .update_membership(membership.clone(), &admin())
        .await
        .unwrap();

    let version_after_noop = f.store.get_group(&group.id).await.unwrap().unwrap().version;
    assert_eq!(version_after_setup, version_after_noop);
}

#[tokio::test]
async fn delete_group_soft_deletes_everything() {
    let f = fixture();
    let group = seed_group(&f.store).await;
    let alice = seed_individual(&f.store, "Alice", "Ba").await;
    f.alignment
        .create_membership(
            GroupMembership::new(group.id.clone(), alice.id.clone(), Some(GroupRole::Head), &admin()),
            &admin(),
        )
        .await
        .unwrap();

    f.alignment.delete_group(&group.id, &admin()).await.unwrap();

    let deleted = f.store.get_group(&group.id).await.unwrap().unwrap();
    assert!(deleted.is_deleted);
    let memberships = f.store.list_memberships_for_group(&group.id).await.unwrap();
    assert!(memberships.iter().all(|m| m.is_deleted));
}
