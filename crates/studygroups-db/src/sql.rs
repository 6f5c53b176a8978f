//! SQLite DDL rendering for [`SchemaChange`]s.

use crate::error::SchemaError;
use crate::planner::SchemaModel;
use crate::schema::{Column, ColumnType, CreateTable, DefaultValue, ForeignKey, Index, OnDelete, SchemaChange};

const REBUILD_PREFIX: &str = "_rebuild_";

/// Statements for one change. `model` must already include the change, so
/// table rebuilds see the new definition.
pub fn render(change: &SchemaChange, model: &SchemaModel) -> Result<Vec<String>, SchemaError> {
    match change {
        SchemaChange::CreateTable(def) => Ok(create_table(def)),
        SchemaChange::DropTable { table } => Ok(vec![format!("DROP TABLE {}", quote(table))]),
        SchemaChange::AddForeignKey { table, .. } | SchemaChange::DropForeignKey { table, .. } => {
            let def = model
                .table(table)
                .ok_or_else(|| SchemaError::UnknownTable(table.clone()))?;
            Ok(rebuild_table(def))
        }
    }
}

/// `CREATE TABLE` followed by one `CREATE INDEX` per index.
pub fn create_table(def: &CreateTable) -> Vec<String> {
    let mut statements = vec![create_table_named(def, &def.table)];
    statements.extend(def.indexes.iter().map(|index| create_index(&def.table, index)));
    statements
}

fn create_table_named(def: &CreateTable, name: &str) -> String {
    let mut parts: Vec<String> = def.columns.iter().map(column).collect();
    parts.extend(def.foreign_keys.iter().map(foreign_key));
    format!("CREATE TABLE {} ({})", quote(name), parts.join(", "))
}

// Copy rows into a table with the new definition, then swap it in.
fn rebuild_table(def: &CreateTable) -> Vec<String> {
    let staging = format!("{REBUILD_PREFIX}{}", def.table);
    let columns = def
        .columns
        .iter()
        .map(|c| quote(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut statements = vec![
        create_table_named(def, &staging),
        format!(
            "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
            quote(&staging),
            quote(&def.table)
        ),
        format!("DROP TABLE {}", quote(&def.table)),
        format!(
            "ALTER TABLE {} RENAME TO {}",
            quote(&staging),
            quote(&def.table)
        ),
    ];
    statements.extend(def.indexes.iter().map(|index| create_index(&def.table, index)));
    statements
}

fn column(column: &Column) -> String {
    let mut sql = format!("{} {}", quote(&column.name), column_type(column.ty));

    if column.primary_key {
        sql.push_str(" PRIMARY KEY");
        if column.ty == ColumnType::Integer {
            sql.push_str(" AUTOINCREMENT");
        } else {
            sql.push_str(" NOT NULL");
        }
    } else if !column.nullable {
        sql.push_str(" NOT NULL");
    }

    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(&literal(default));
    }
    sql
}

fn column_type(ty: ColumnType) -> String {
    match ty {
        ColumnType::String { max_len: Some(n) } => format!("VARCHAR({n})"),
        ColumnType::String { max_len: None } => "TEXT".to_string(),
        ColumnType::Integer => "INTEGER".to_string(),
        ColumnType::DateTime => "TIMESTAMP".to_string(),
    }
}

fn foreign_key(fk: &ForeignKey) -> String {
    let mut sql = format!(
        "FOREIGN KEY ({}) REFERENCES {} ({})",
        quote(&fk.column),
        quote(&fk.references_table),
        quote(&fk.references_column)
    );
    let action = match fk.on_delete {
        OnDelete::NoAction => None,
        OnDelete::Restrict => Some("RESTRICT"),
        OnDelete::Cascade => Some("CASCADE"),
        OnDelete::SetNull => Some("SET NULL"),
    };
    if let Some(action) = action {
        sql.push_str(" ON DELETE ");
        sql.push_str(action);
    }
    sql
}

fn create_index(table: &str, index: &Index) -> String {
    let columns = index
        .columns
        .iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE {}INDEX {} ON {} ({columns})",
        if index.unique { "UNIQUE " } else { "" },
        quote(&index.name),
        quote(table)
    )
}

fn literal(value: &DefaultValue) -> String {
    match value {
        DefaultValue::Integer(n) => n.to_string(),
        DefaultValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members() -> CreateTable {
        CreateTable::new("members")
            .column(Column::new("id", ColumnType::Integer).primary_key())
            .column(Column::new("group_id", ColumnType::Integer).not_null())
            .column(Column::new("nick", ColumnType::string(20)).not_null())
            .column(
                Column::new("motto", ColumnType::text())
                    .default_value(DefaultValue::Text("carpe 'diem'".into())),
            )
            .column(
                Column::new("seats", ColumnType::Integer).default_value(DefaultValue::Integer(1)),
            )
            .column(Column::new("joined_on", ColumnType::DateTime).not_null())
            .index(Index::new("members_nick_key", &["nick"]).unique())
    }

    #[test]
    fn renders_create_table_with_constraints() {
        let def = members().foreign_key(ForeignKey::new("group_id", "groups").on_delete(OnDelete::Cascade));
        let statements = create_table(&def);

        assert_eq!(
            statements[0],
            "CREATE TABLE \"members\" (\
             \"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"group_id\" INTEGER NOT NULL, \
             \"nick\" VARCHAR(20) NOT NULL, \
             \"motto\" TEXT DEFAULT 'carpe ''diem''', \
             \"seats\" INTEGER DEFAULT 1, \
             \"joined_on\" TIMESTAMP NOT NULL, \
             FOREIGN KEY (\"group_id\") REFERENCES \"groups\" (\"id\") ON DELETE CASCADE)"
        );
        assert_eq!(
            statements[1],
            "CREATE UNIQUE INDEX \"members_nick_key\" ON \"members\" (\"nick\")"
        );
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn text_primary_key_is_not_autoincrement() {
        let def = CreateTable::new("codes")
            .column(Column::new("code", ColumnType::string(8)).primary_key());
        assert_eq!(
            create_table(&def),
            vec!["CREATE TABLE \"codes\" (\"code\" VARCHAR(8) PRIMARY KEY NOT NULL)".to_string()]
        );
    }

    #[test]
    fn renders_drop_table() {
        let model = SchemaModel::new();
        let statements = render(
            &SchemaChange::DropTable {
                table: "members".into(),
            },
            &model,
        )
        .unwrap();
        assert_eq!(statements, vec!["DROP TABLE \"members\"".to_string()]);
    }

    #[test]
    fn foreign_key_change_rebuilds_table() {
        let mut model = SchemaModel::new();
        model
            .apply(&SchemaChange::CreateTable(
                CreateTable::new("groups")
                    .column(Column::new("id", ColumnType::Integer).primary_key()),
            ))
            .unwrap();
        model.apply(&SchemaChange::CreateTable(members())).unwrap();

        let change = SchemaChange::AddForeignKey {
            table: "members".into(),
            foreign_key: ForeignKey::new("group_id", "groups"),
        };
        model.apply(&change).unwrap();
        let statements = render(&change, &model).unwrap();

        assert_eq!(statements.len(), 5);
        assert!(statements[0].starts_with("CREATE TABLE \"_rebuild_members\" ("));
        assert!(statements[0].ends_with("FOREIGN KEY (\"group_id\") REFERENCES \"groups\" (\"id\"))"));
        assert_eq!(
            statements[1],
            "INSERT INTO \"_rebuild_members\" (\"id\", \"group_id\", \"nick\", \"motto\", \"seats\", \"joined_on\") \
             SELECT \"id\", \"group_id\", \"nick\", \"motto\", \"seats\", \"joined_on\" FROM \"members\""
        );
        assert_eq!(statements[2], "DROP TABLE \"members\"");
        assert_eq!(
            statements[3],
            "ALTER TABLE \"_rebuild_members\" RENAME TO \"members\""
        );
        assert_eq!(
            statements[4],
            "CREATE UNIQUE INDEX \"members_nick_key\" ON \"members\" (\"nick\")"
        );
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote("users"), "\"users\"");
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }
}
