pub use sea_orm_migration::prelude::*;

mod m20261001_000000_init;
mod m20261010_000000_reconciliation_indexes;
mod m20261018_000000_vas_reservations;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000000_init::Migration),
            Box::new(m20261010_000000_reconciliation_indexes::Migration),
            Box::new(m20261018_000000_vas_reservations::Migration),
        ]
    }
}
