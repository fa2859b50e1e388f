//! CatalogStore integration tests
//!
//! Require DATABASE_URL pointing at a Postgres with pgvector; skipped
//! otherwise.

mod helpers;

use sqlx::PgPool;
use uuid::Uuid;

use cardscan::db::CatalogStore;
use cardscan::models::{OracleCard, Printing};
use helpers::{at_cosine, orthogonal_to, random_unit_vec, record, test_pool, unique_set_code};

async fn latest_printing_ids(pool: &PgPool, oracle_id: Uuid) -> Vec<Uuid> {
    sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM printings WHERE oracle_id = $1 AND is_latest_printing",
    )
    .bind(oracle_id)
    .fetch_all(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn latest_printing_tracks_greatest_release_date() {
    let Some(pool) = test_pool().await else { return };
    let store = CatalogStore::new(pool.clone());
    let set = unique_set_code();
    let oracle = Uuid::new_v4();
    let name = format!("{set} Serra Angel");

    let printings: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    let batch = vec![
        record(oracle, printings[0], &name, &set, "1", "2020-01-01"),
        record(oracle, printings[1], &name, &set, "2", "2022-06-15"),
        record(oracle, printings[2], &name, &set, "3", "2024-03-01"),
    ];
    assert_eq!(store.upsert_batch(&batch).await.unwrap(), 3);
    assert_eq!(latest_printing_ids(&pool, oracle).await, vec![printings[2]]);

    // A later upsert with an intermediate date must not steal the flag.
    let fourth = vec![record(oracle, printings[3], &name, &set, "4", "2023-08-10")];
    store.upsert_batch(&fourth).await.unwrap();
    assert_eq!(latest_printing_ids(&pool, oracle).await, vec![printings[2]]);
}

#[tokio::test]
async fn latest_printing_holds_for_any_insertion_order() {
    let Some(pool) = test_pool().await else { return };
    let store = CatalogStore::new(pool.clone());
    let set = unique_set_code();
    let oracle = Uuid::new_v4();
    let name = format!("{set} Shivan Dragon");

    // Newest first, then strictly older ones, one batch at a time.
    let newest = Uuid::new_v4();
    for (printing, date) in [
        (newest, "2024-03-01"),
        (Uuid::new_v4(), "2020-01-01"),
        (Uuid::new_v4(), "2022-06-15"),
    ] {
        let batch = vec![record(oracle, printing, &name, &set, "1", date)];
        store.upsert_batch(&batch).await.unwrap();
        assert_eq!(
            latest_printing_ids(&pool, oracle).await,
            vec![newest],
            "exactly one latest printing after each upsert"
        );
    }
}

#[tokio::test]
async fn latest_printing_tie_breaks_on_printing_id() {
    let Some(pool) = test_pool().await else { return };
    let store = CatalogStore::new(pool.clone());
    let set = unique_set_code();
    let oracle = Uuid::new_v4();
    let name = format!("{set} Giant Growth");

    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let batch = vec![
        record(oracle, a, &name, &set, "1", "2021-05-01"),
        record(oracle, b, &name, &set, "2", "2021-05-01"),
    ];
    store.upsert_batch(&batch).await.unwrap();

    let latest = latest_printing_ids(&pool, oracle).await;
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0], a.min(b));
}

#[tokio::test]
async fn replaying_a_batch_changes_nothing() {
    let Some(pool) = test_pool().await else { return };
    let store = CatalogStore::new(pool.clone());
    let set = unique_set_code();
    let oracle = Uuid::new_v4();
    let name = format!("{set} Counterspell");

    let batch = vec![
        record(oracle, Uuid::new_v4(), &name, &set, "1", "2019-08-23"),
        record(oracle, Uuid::new_v4(), &name, &set, "2", "2021-04-23"),
    ];
    store.upsert_batch(&batch).await.unwrap();

    let snapshot = |pool: PgPool, oracle: Uuid| async move {
        sqlx::query_as::<_, Printing>(
            "SELECT * FROM printings WHERE oracle_id = $1 ORDER BY id",
        )
        .bind(oracle)
        .fetch_all(&pool)
        .await
        .unwrap()
    };

    let before = snapshot(pool.clone(), oracle).await;
    store.upsert_batch(&batch).await.unwrap();
    let after = snapshot(pool.clone(), oracle).await;
    assert_eq!(before, after);
}

#[tokio::test]
async fn reingestion_refreshes_the_oracle_name() {
    let Some(pool) = test_pool().await else { return };
    let store = CatalogStore::new(pool.clone());
    let set = unique_set_code();
    let oracle = Uuid::new_v4();
    let printing = Uuid::new_v4();

    let misspelled = format!("{set} Lighming Bolt");
    store
        .upsert_batch(&[record(oracle, printing, &misspelled, &set, "1", "2010-07-16")])
        .await
        .unwrap();

    // The upstream fixed the name; reingestion carries the fix through.
    let corrected = format!("{set} Lightning Bolt");
    store
        .upsert_batch(&[record(oracle, printing, &corrected, &set, "1", "2010-07-16")])
        .await
        .unwrap();

    let card = sqlx::query_as::<_, OracleCard>(
        "SELECT id, name, created_at, updated_at FROM oracle_cards WHERE id = $1",
    )
    .bind(oracle)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(card.name, corrected);
    assert!(card.updated_at >= card.created_at);
}

#[tokio::test]
async fn malformed_records_are_skipped() {
    let Some(pool) = test_pool().await else { return };
    let store = CatalogStore::new(pool.clone());
    let set = unique_set_code();
    let oracle = Uuid::new_v4();
    let name = format!("{set} Duress");

    let good = record(oracle, Uuid::new_v4(), &name, &set, "1", "2020-01-01");
    let mut bad_oracle = record(Uuid::new_v4(), Uuid::new_v4(), &name, &set, "2", "2020-01-01");
    bad_oracle.oracle_id = "not-a-uuid".to_string();
    let mut no_image = record(oracle, Uuid::new_v4(), &name, &set, "3", "2020-01-01");
    no_image.image_url = None;

    let processed = store
        .upsert_batch(&[good, bad_oracle, no_image])
        .await
        .unwrap();
    assert_eq!(processed, 1);

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM printings WHERE set_code = $1")
            .bind(&set)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn saved_embeddings_are_unit_norm_and_stamped() {
    let Some(pool) = test_pool().await else { return };
    let store = CatalogStore::new(pool.clone());
    let set = unique_set_code();
    let oracle = Uuid::new_v4();
    let name = format!("{set} Opt");

    let older = Uuid::new_v4();
    let newer = Uuid::new_v4();
    let batch = vec![
        record(oracle, older, &name, &set, "1", "2017-09-29"),
        record(oracle, newer, &name, &set, "2", "2021-04-23"),
    ];
    store.upsert_batch(&batch).await.unwrap();

    // Latest printing first in the backfill queue.
    let pending = store.printings_without_embedding(Some(&set)).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].0, newer);

    store
        .save_embedding(newer, &random_unit_vec(7))
        .await
        .unwrap();

    let stored: pgvector::Vector =
        sqlx::query_scalar("SELECT embedding FROM printings WHERE id = $1")
            .bind(newer)
            .fetch_one(&pool)
            .await
            .unwrap();
    let norm: f32 = stored.as_slice().iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-3);

    let stamped: bool = sqlx::query_scalar(
        "SELECT embedding_updated_at IS NOT NULL FROM printings WHERE id = $1",
    )
    .bind(newer)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(stamped);

    // The stamp pairs with the vector: no row has one without the other.
    let unpaired: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM printings \
         WHERE (embedding IS NULL) <> (embedding_updated_at IS NULL)",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(unpaired, 0);

    let pending = store.printings_without_embedding(Some(&set)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0, older);
}

#[tokio::test]
async fn find_by_name_is_case_insensitive_and_prefix_tolerant() {
    let Some(pool) = test_pool().await else { return };
    let store = CatalogStore::new(pool.clone());
    let set = unique_set_code();
    let oracle = Uuid::new_v4();
    // Set-code prefix keeps this run's names out of other runs' prefix
    // searches.
    let name = format!("{set} Felidar Guardian");

    let batch = vec![
        record(oracle, Uuid::new_v4(), &name, &set, "19", "2017-01-20"),
        record(oracle, Uuid::new_v4(), &name, &set, "19a", "2023-03-17"),
    ];
    store.upsert_batch(&batch).await.unwrap();

    let exact = store.find_by_name(&name.to_lowercase()).await.unwrap();
    let exact = exact.expect("exact match");
    assert_eq!(exact.name, name);
    assert_eq!(exact.distance, 0.0);
    // Always paired with the latest printing.
    assert_eq!(exact.collector_number, "19a");

    // One letter short: the prefix fallback still finds the card.
    let clipped = &name[..name.len() - 1];
    let by_prefix = store.find_by_name(clipped).await.unwrap();
    assert_eq!(by_prefix.expect("prefix match").name, name);

    // Too short for the prefix fallback, and no exact match.
    assert!(store.find_by_name(&name[..3]).await.unwrap().is_none());

    assert!(store
        .find_by_name(&format!("{set} Wholly Unrelated"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn set_exists_matches_case_insensitively() {
    let Some(pool) = test_pool().await else { return };
    let store = CatalogStore::new(pool.clone());
    let set = unique_set_code();
    let oracle = Uuid::new_v4();
    let name = format!("{set} Ponder");

    assert!(!store.set_exists(&set).await.unwrap());
    let batch = vec![record(oracle, Uuid::new_v4(), &name, &set, "1", "2011-07-15")];
    store.upsert_batch(&batch).await.unwrap();

    assert!(store.set_exists(&set).await.unwrap());
    assert!(store.set_exists(&set.to_lowercase()).await.unwrap());
}

#[tokio::test]
async fn find_closest_orders_by_cosine_distance() {
    let Some(pool) = test_pool().await else { return };
    let store = CatalogStore::new(pool.clone());
    let set = unique_set_code();

    let bolt_vec = random_unit_vec(101);
    let perp = orthogonal_to(&bolt_vec, &random_unit_vec(202));
    // cos 0.8 to the bolt: clearly related, clearly second.
    let shock_vec = at_cosine(&bolt_vec, &perp, 0.8);

    let bolt_oracle = Uuid::new_v4();
    let shock_oracle = Uuid::new_v4();
    let bolt_printing = Uuid::new_v4();
    let shock_printing = Uuid::new_v4();
    let batch = vec![
        record(
            bolt_oracle,
            bolt_printing,
            &format!("{set} Lightning Bolt"),
            &set,
            "149",
            "2010-07-16",
        ),
        record(
            shock_oracle,
            shock_printing,
            &format!("{set} Shock"),
            &set,
            "159",
            "2010-07-16",
        ),
    ];
    store.upsert_batch(&batch).await.unwrap();
    store.save_embedding(bolt_printing, &bolt_vec).await.unwrap();
    store.save_embedding(shock_printing, &shock_vec).await.unwrap();

    let query = helpers::normalize(at_cosine(&bolt_vec, &perp, 0.999));
    let hits = store.find_closest(&query, 10).await.unwrap();

    assert!(hits.len() >= 2);
    assert_eq!(hits[0].printing_id, bolt_printing);
    assert!(hits[0].distance < 0.05, "distance {}", hits[0].distance);
    let shock_pos = hits
        .iter()
        .position(|h| h.printing_id == shock_printing)
        .expect("related card in top-K");
    assert!(hits[shock_pos].distance > hits[0].distance);
    for window in hits.windows(2) {
        assert!(window[0].distance <= window[1].distance, "ascending order");
    }
}
