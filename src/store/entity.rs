//! SeaORM entity for the `link` table used by the [SQL store
//! backend](super::Sql).
//!
//! | Column     | Type               |
//! |------------|--------------------|
//! | id         | TEXT (Primary Key) |
//! | name       | TEXT (Unique)      |
//! | redirect   | TEXT               |
//! | visits     | BIGINT             |
//! | created_at | TIMESTAMPTZ        |
//! | updated_at | TIMESTAMPTZ        |

use anyhow::Context;
use sea_orm::{entity::prelude::*, ActiveValue::Set};

use crate::{
	normalized::{Name, Redirect},
	store::Link,
};

/// A row of the `link` table
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "link")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
	pub id: String,
	#[sea_orm(unique, column_type = "Text")]
	pub name: String,
	#[sea_orm(column_type = "Text")]
	pub redirect: String,
	pub visits: i64,
	pub created_at: TimeDateTimeWithTimeZone,
	pub updated_at: TimeDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Link {
	type Error = anyhow::Error;

	fn try_from(model: Model) -> Result<Self, Self::Error> {
		Ok(Self {
			id: model
				.id
				.parse()
				.with_context(|| format!("invalid link id {:?} in database", model.id))?,
			name: Name::new(&model.name)
				.with_context(|| format!("invalid link name {:?} in database", model.name))?,
			redirect: Redirect::new_unchecked(model.redirect),
			visits: u64::try_from(model.visits).unwrap_or_default(),
			created_at: model.created_at,
			updated_at: model.updated_at,
		})
	}
}

impl From<Link> for ActiveModel {
	fn from(link: Link) -> Self {
		Self {
			id: Set(link.id.to_string()),
			name: Set(link.name.into_string()),
			redirect: Set(link.redirect.into_string()),
			visits: Set(i64::try_from(link.visits).unwrap_or(i64::MAX)),
			created_at: Set(link.created_at),
			updated_at: Set(link.updated_at),
		}
	}
}
