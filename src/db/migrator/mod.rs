use sea_orm_migration::prelude::*;

mod m20250601_initial;
mod m20250602_add_users;
mod m20250610_add_system_logs;
mod m20250615_add_scheduled_jobs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250601_initial::Migration),
            Box::new(m20250602_add_users::Migration),
            Box::new(m20250610_add_system_logs::Migration),
            Box::new(m20250615_add_scheduled_jobs::Migration),
        ]
    }
}
