use chrono::NaiveDate;
use memorm::{
    Database, DbError, EntityRecord, FetchMode, IdCard, PersistConfig, PersistSession, Related,
    Result, SchemaMode, SessionFactory, Student, StudentGroup, Value, school_registry,
};
use std::sync::Arc;

async fn factory(fetch: FetchMode) -> Result<SessionFactory> {
    let registry = Arc::new(school_registry(fetch)?);
    let db = Database::new(format!("session_{}", uuid::Uuid::new_v4()));
    SessionFactory::with_database(PersistConfig::new(db.name()), registry, db).await
}

fn jack() -> Student {
    Student::new(
        "Jack",
        NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
        StudentGroup::Rose,
    )
}

/// Persists Jack with a new active card; returns (student id, card id).
async fn seed(session: &PersistSession) -> Result<(i64, i64)> {
    let mut student = jack();
    student.set_id_card(&IdCard::new(true));
    let student_id = session.save(&mut student).await?;
    Ok((student_id, student.id_card_id().unwrap()))
}

#[tokio::test]
async fn test_persist_cascades_to_owned_card() -> Result<()> {
    let factory = factory(FetchMode::Eager).await?;
    let session = factory.open_session();

    let (student_id, card_id) = seed(&session).await?;
    assert_eq!(student_id, 1);
    assert_eq!(card_id, 1);

    let db = factory.database();
    assert_eq!(db.row_count("student").await?, 1);
    assert_eq!(db.row_count("id_card").await?, 1);

    let schema = db.table_schema("student").await?;
    let fk_idx = schema.schema().find_column_index("id_card_id").unwrap();
    let row = db.get_row("student", student_id).await?.unwrap();
    assert_eq!(row[fk_idx], Value::Integer(card_id));
    Ok(())
}

#[tokio::test]
async fn test_find_returns_related_id() -> Result<()> {
    for fetch in [FetchMode::Eager, FetchMode::Lazy] {
        let factory = factory(fetch).await?;
        let session = factory.open_session();
        let (student_id, card_id) = seed(&session).await?;

        let record = session.find("Student", student_id).await?;
        assert_eq!(record.id(), Some(student_id));
        assert_eq!(record.require_text("name")?, "Jack");
        assert_eq!(record.related().id(), Some(card_id));
    }
    Ok(())
}

#[tokio::test]
async fn test_find_missing_is_not_found() -> Result<()> {
    let factory = factory(FetchMode::Lazy).await?;
    let session = factory.open_session();

    let err = session.find("Student", 42).await.unwrap_err();
    assert_eq!(
        err,
        DbError::NotFound {
            type_name: "Student".to_string(),
            id: 42
        }
    );
    assert!(matches!(
        session.find("Teacher", 1).await,
        Err(DbError::UnknownType(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_student_without_card() -> Result<()> {
    let factory = factory(FetchMode::Eager).await?;
    let session = factory.open_session();

    let mut student = jack();
    let id = session.save(&mut student).await?;
    let loaded: Student = session.load_entity(id).await?;
    assert_eq!(loaded.id_card_id(), None);
    assert!(loaded.id_card().await?.is_none());
    assert!(loaded.related().is_absent());
    Ok(())
}

#[tokio::test]
async fn test_inverse_side_stores_nothing() -> Result<()> {
    let factory = factory(FetchMode::Eager).await?;
    let session = factory.open_session();

    let mut holder = EntityRecord::new("Student").with("name", "Ann");
    session.persist(&mut holder).await?;

    // Linking from the card side does not write a foreign key anywhere.
    let mut card = EntityRecord::new("IdCard")
        .with("active", true)
        .with_related(Related::loaded(holder.clone()));
    let card_id = session.persist(&mut card).await?;

    let schema = factory.database().table_schema("id_card").await?;
    assert_eq!(schema.schema().column_count(), 2);
    let loaded = session.find("IdCard", card_id).await?;
    assert!(loaded.related().is_absent());
    Ok(())
}

#[tokio::test]
async fn test_persist_validation() -> Result<()> {
    let factory = factory(FetchMode::Eager).await?;
    let session = factory.open_session();

    let mut nameless = EntityRecord::new("Student").with("group", "ROSE");
    assert!(matches!(
        session.persist(&mut nameless).await,
        Err(DbError::ConstraintViolation(_))
    ));

    let mut bad_group = EntityRecord::new("Student")
        .with("name", "Jack")
        .with("group", "TULIP");
    assert!(matches!(
        session.persist(&mut bad_group).await,
        Err(DbError::TypeMismatch(_))
    ));

    let mut unknown_field = EntityRecord::new("Student")
        .with("name", "Jack")
        .with("nickname", "J");
    assert!(matches!(
        session.persist(&mut unknown_field).await,
        Err(DbError::ColumnNotFound(field, _)) if field == "nickname"
    ));

    let mut wrong_target = EntityRecord::new("Student")
        .with("name", "Jack")
        .with_related(Related::loaded(EntityRecord::new("Student").with("name", "Jill")));
    assert!(matches!(
        session.persist(&mut wrong_target).await,
        Err(DbError::TypeMismatch(_))
    ));
    assert_eq!(factory.database().row_count("student").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_persisted_record_cannot_be_persisted_again() -> Result<()> {
    let factory = factory(FetchMode::Eager).await?;
    let session = factory.open_session();

    let mut card = IdCard::new(true);
    session.save(&mut card).await?;
    let err = session.save(&mut card).await.unwrap_err();
    assert!(matches!(err, DbError::ConstraintViolation(msg) if msg.contains("already persisted")));
    Ok(())
}

#[tokio::test]
async fn test_two_students_cannot_share_a_card() -> Result<()> {
    let factory = factory(FetchMode::Eager).await?;
    let session = factory.open_session();

    let mut card = IdCard::new(true);
    session.save(&mut card).await?;

    let mut first = jack();
    first.set_id_card(&card);
    session.save(&mut first).await?;

    let mut second = jack();
    second.set_id_card(&card);
    let err = session.save(&mut second).await.unwrap_err();
    assert!(matches!(err, DbError::ConstraintViolation(msg) if msg.contains("unique")));
    assert_eq!(factory.database().row_count("student").await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_foreign_key_must_point_at_a_stored_card() -> Result<()> {
    let factory = factory(FetchMode::Eager).await?;
    let session = factory.open_session();

    let stale = stale_card(&session, EntityRecord::new("IdCard").with("active", true)).await?;
    let ghost = Related::loaded(stale);

    let mut student = EntityRecord::new("Student")
        .with("name", "Jack")
        .with_related(ghost);
    let err = session.persist(&mut student).await.unwrap_err();
    assert!(matches!(err, DbError::ConstraintViolation(msg) if msg.contains("non-existent")));
    Ok(())
}

/// Persists `card`, then deletes its row so the record keeps a stale id.
async fn stale_card(
    session: &PersistSession,
    mut card: EntityRecord,
) -> Result<EntityRecord> {
    let id = session.persist(&mut card).await?;
    session.delete("IdCard", id).await?;
    Ok(card)
}

#[tokio::test]
async fn test_delete() -> Result<()> {
    let factory = factory(FetchMode::Eager).await?;
    let session = factory.open_session();
    let (student_id, _) = seed(&session).await?;

    session.delete("Student", student_id).await?;
    assert!(matches!(
        session.find("Student", student_id).await,
        Err(DbError::NotFound { .. })
    ));
    assert!(matches!(
        session.delete("Student", student_id).await,
        Err(DbError::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_eager_load_of_deleted_card_is_absent() -> Result<()> {
    let factory = factory(FetchMode::Eager).await?;
    let session = factory.open_session();
    let (student_id, card_id) = seed(&session).await?;

    session.delete("IdCard", card_id).await?;
    let student: Student = session.load_entity(student_id).await?;
    assert!(student.id_card().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_schema_none_requires_existing_tables() -> Result<()> {
    let registry = Arc::new(school_registry(FetchMode::Eager)?);
    let db = Database::new("empty");
    let config = PersistConfig::new("empty").schema_mode(SchemaMode::None);
    let factory = SessionFactory::with_database(config, registry, db).await?;
    let session = factory.open_session();

    let mut card = IdCard::new(true);
    assert!(matches!(
        session.save(&mut card).await,
        Err(DbError::TableNotFound(table)) if table == "id_card"
    ));
    assert!(matches!(
        session.find("Student", 1).await,
        Err(DbError::TableNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_schema_none_keeps_existing_rows() -> Result<()> {
    let name = format!("shared_{}", uuid::Uuid::new_v4());
    let registry = Arc::new(school_registry(FetchMode::Eager)?);

    let writer = SessionFactory::open(PersistConfig::new(&name), registry.clone()).await?;
    let (student_id, card_id) = seed(&writer.open_session()).await?;

    let config = PersistConfig::from_url(&format!("memorm://{}?schema=none", name))?;
    let reader = SessionFactory::open(config, registry.clone()).await?;
    let student: Student = reader.open_session().load_entity(student_id).await?;
    assert_eq!(student.name, "Jack");
    assert_eq!(student.id_card_id(), Some(card_id));

    // Reopening with schema creation wipes the tables.
    let recreated = SessionFactory::open(PersistConfig::new(&name), registry).await?;
    assert_eq!(recreated.database().row_count("student").await?, 0);
    Database::drop_named(&name).await;
    Ok(())
}

#[tokio::test]
async fn test_closed_session_rejects_work() -> Result<()> {
    let factory = factory(FetchMode::Eager).await?;
    let session = factory.open_session();
    let (student_id, _) = seed(&session).await?;

    session.close().await?;
    assert!(session.is_closed());
    session.close().await?;

    assert_eq!(
        session.find("Student", student_id).await.unwrap_err(),
        DbError::SessionClosed
    );
    let mut card = IdCard::new(true);
    assert_eq!(session.save(&mut card).await.unwrap_err(), DbError::SessionClosed);
    assert_eq!(
        session.begin_transaction().await.unwrap_err(),
        DbError::SessionClosed
    );

    let fresh = factory.open_session();
    assert_ne!(fresh.id(), session.id());
    fresh.find("Student", student_id).await?;
    Ok(())
}

#[tokio::test]
async fn test_sql_echo_does_not_change_behavior() -> Result<()> {
    let registry = Arc::new(school_registry(FetchMode::Lazy)?);
    let db = Database::new("echo");
    let config = PersistConfig::new("echo").show_sql(true);
    let factory = SessionFactory::with_database(config, registry, db).await?;
    assert!(factory.config().show_sql);

    let session = factory.open_session();
    let (student_id, _) = seed(&session).await?;
    session.delete("Student", student_id).await?;
    assert_eq!(factory.database().row_count("student").await?, 0);
    Ok(())
}
