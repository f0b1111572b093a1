use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One media item known to the catalog. Rows are fed by the external
/// indexer and consulted by the next-episode predictor; a row is pruned
/// when the remote store reports the item gone.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "catalog_files")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub container_id: String,
    pub item_id: String,
    pub content_id: String,
    pub file_name: String,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
