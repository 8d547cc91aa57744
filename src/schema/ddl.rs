use crate::core::{Column, DataType, Result};
use crate::mapping::naming::quote_identifier;
use crate::mapping::{EntityDescriptor, MappingRegistry, RelationshipSide};
use crate::storage::{Catalog, TableSchema};

/// Builds the table schema for one entity.
///
/// Column order: primary key, scalar fields in declaration order, then the
/// foreign-key column. Only the owning side of a relationship gets one.
pub fn table_schema_for(
    registry: &MappingRegistry,
    descriptor: &EntityDescriptor,
) -> Result<TableSchema> {
    let mut columns = Vec::with_capacity(descriptor.scalar_fields().len() + 2);
    columns.push(Column::new(descriptor.primary_key_field(), DataType::Integer).primary_key());

    for field in descriptor.scalar_fields() {
        let mut column = Column::new(field.name.clone(), field.data_type.clone());
        if !field.nullable {
            column = column.not_null();
        }
        columns.push(column);
    }

    if let Some((relationship, RelationshipSide::Owning)) =
        registry.relationship_of(descriptor.type_name())?
    {
        let target = registry.resolve(relationship.inverse_type())?;
        columns.push(
            Column::new(relationship.foreign_key_column(), DataType::Integer)
                .unique()
                .references(target.table_name(), target.primary_key_field()),
        );
    }

    Ok(TableSchema::new(descriptor.table_name(), columns))
}

/// One table schema per registered entity.
pub fn generate_catalog(registry: &MappingRegistry) -> Result<Catalog> {
    registry
        .entities()
        .try_fold(Catalog::new(), |catalog, descriptor| {
            catalog.with_table(table_schema_for(registry, descriptor)?)
        })
}

pub fn render_create_table(schema: &TableSchema) -> String {
    let mut parts = Vec::with_capacity(schema.schema().column_count());
    for column in schema.schema().columns() {
        let mut part = format!(
            "{} {}",
            quote_identifier(&column.name),
            column.data_type.sql_type()
        );
        if column.primary_key {
            part.push_str(" PRIMARY KEY");
        } else if !column.nullable {
            part.push_str(" NOT NULL");
        }
        if column.unique {
            part.push_str(" UNIQUE");
        }
        if let Some(fk) = &column.references {
            part.push_str(&format!(
                " REFERENCES {}({})",
                quote_identifier(&fk.table),
                quote_identifier(&fk.column)
            ));
        }
        parts.push(part);
    }
    format!(
        "CREATE TABLE {} ({})",
        quote_identifier(schema.name()),
        parts.join(", ")
    )
}

pub fn render_drop_table(schema: &TableSchema) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_identifier(schema.name()))
}

/// `CREATE TABLE` statements for every mapped entity, ordered by table name.
pub fn generate_ddl(registry: &MappingRegistry) -> Result<Vec<String>> {
    let catalog = generate_catalog(registry)?;
    Ok(catalog.tables().map(render_create_table).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{EntityDescriptor, FetchMode};

    fn registry() -> MappingRegistry {
        let mut builder = MappingRegistry::builder();
        builder
            .register(
                EntityDescriptor::builder("Student")
                    .table("student")
                    .id("id")
                    .required_field("name", DataType::Text)
                    .field("date_of_birth", DataType::Date)
                    .field("group", DataType::enumerated(["ROSE", "LOTUS"]))
                    .owns_one("id_card", "IdCard")
                    .fetch(FetchMode::Lazy)
                    .build()
                    .unwrap(),
            )
            .unwrap()
            .register(
                EntityDescriptor::builder("IdCard")
                    .table("id_card")
                    .id("id")
                    .field("active", DataType::Boolean)
                    .inverse_one("student", "Student", "id_card")
                    .build()
                    .unwrap(),
            )
            .unwrap();
        builder.freeze().unwrap()
    }

    #[test]
    fn test_only_owner_table_has_foreign_key() {
        let catalog = generate_catalog(&registry()).unwrap();
        let student = catalog.get_table("student").unwrap();
        let card = catalog.get_table("id_card").unwrap();

        assert!(student.has_foreign_key());
        assert!(!card.has_foreign_key());
        let fk = student.schema().get_column("id_card_id").unwrap();
        assert_eq!(fk.references.as_ref().unwrap().table, "id_card");
        assert!(fk.nullable);
        assert!(fk.unique);
        assert!(card.schema().get_column("student_id").is_none());
    }

    #[test]
    fn test_ddl_rendering() {
        let ddl = generate_ddl(&registry()).unwrap();
        assert_eq!(
            ddl,
            vec![
                "CREATE TABLE id_card (id INTEGER PRIMARY KEY, active BOOLEAN)".to_string(),
                "CREATE TABLE student (id INTEGER PRIMARY KEY, name TEXT NOT NULL, date_of_birth DATE, \"group\" TEXT, id_card_id INTEGER UNIQUE REFERENCES id_card(id))".to_string(),
            ]
        );
    }

    #[test]
    fn test_drop_statement() {
        let catalog = generate_catalog(&registry()).unwrap();
        assert_eq!(
            render_drop_table(catalog.get_table("student").unwrap()),
            "DROP TABLE IF EXISTS student"
        );
    }
}
