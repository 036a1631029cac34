use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_users_table::Migration),
            Box::new(m20240601_000002_create_products_table::Migration),
            Box::new(m20240601_000003_create_address_book_tables::Migration),
            Box::new(m20240601_000004_create_cart_tables::Migration),
            Box::new(m20240601_000005_create_orders_table::Migration),
        ]
    }
}

mod m20240601_000001_create_users_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_users_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Users::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Users::Email).string().not_null().unique_key())
                        .col(ColumnDef::new(Users::FirstName).string().not_null())
                        .col(ColumnDef::new(Users::LastName).string().not_null())
                        .col(ColumnDef::new(Users::Phone).string().null())
                        .col(ColumnDef::new(Users::ProcessorCustomerId).string().null())
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Users::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Users {
        Table,
        Id,
        Email,
        FirstName,
        LastName,
        Phone,
        ProcessorCustomerId,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_products_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Description).text().null())
                        .col(
                            ColumnDef::new(Products::Price)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Products::DiscountPrice).decimal_len(16, 4).null())
                        .col(
                            ColumnDef::new(Products::IsOnSale)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Products::StockQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
        Name,
        Description,
        Price,
        DiscountPrice,
        IsOnSale,
        StockQuantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000003_create_address_book_tables {

    use super::m20240601_000001_create_users_table::Users;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_address_book_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Addresses::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Addresses::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Addresses::UserId).uuid().not_null())
                        .col(ColumnDef::new(Addresses::Street).string().not_null())
                        .col(ColumnDef::new(Addresses::City).string().not_null())
                        .col(ColumnDef::new(Addresses::PostalCode).string().not_null())
                        .col(ColumnDef::new(Addresses::Country).string().not_null())
                        .col(
                            ColumnDef::new(Addresses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_addresses_user_id")
                                .from(Addresses::Table, Addresses::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_addresses_user_id")
                        .table(Addresses::Table)
                        .col(Addresses::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PaymentMethods::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentMethods::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentMethods::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(PaymentMethods::ProcessorPaymentMethodId)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentMethods::Brand).string().null())
                        .col(ColumnDef::new(PaymentMethods::Last4).string_len(4).null())
                        .col(
                            ColumnDef::new(PaymentMethods::IsDefault)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(PaymentMethods::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payment_methods_user_id")
                                .from(PaymentMethods::Table, PaymentMethods::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_methods_user_id")
                        .table(PaymentMethods::Table)
                        .col(PaymentMethods::UserId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentMethods::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Addresses::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Addresses {
        Table,
        Id,
        UserId,
        Street,
        City,
        PostalCode,
        Country,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum PaymentMethods {
        Table,
        Id,
        UserId,
        ProcessorPaymentMethodId,
        Brand,
        Last4,
        IsDefault,
        CreatedAt,
    }
}

mod m20240601_000004_create_cart_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_cart_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Carts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Carts::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Carts::UserId).uuid().null())
                        .col(ColumnDef::new(Carts::GuestId).string_len(64).null())
                        .col(
                            ColumnDef::new(Carts::ExpiresAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Carts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Carts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One cart per owner; NULLs do not collide
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_carts_user_id")
                        .table(Carts::Table)
                        .col(Carts::UserId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_carts_guest_id")
                        .table(Carts::Table)
                        .col(Carts::GuestId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CartLines::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartLines::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(CartLines::CartId).uuid().not_null())
                        .col(ColumnDef::new(CartLines::ProductId).uuid().not_null())
                        .col(ColumnDef::new(CartLines::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(CartLines::Selected)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(CartLines::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CartLines::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_lines_cart_id")
                                .from(CartLines::Table, CartLines::CartId)
                                .to(Carts::Table, Carts::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_lines_cart_product")
                        .table(CartLines::Table)
                        .col(CartLines::CartId)
                        .col(CartLines::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Carts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Carts {
        Table,
        Id,
        UserId,
        GuestId,
        ExpiresAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CartLines {
        Table,
        Id,
        CartId,
        ProductId,
        Quantity,
        Selected,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000005_create_orders_table {

    use super::m20240601_000001_create_users_table::Users;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000005_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::CartId).uuid().null())
                        .col(ColumnDef::new(Orders::LineItems).json().not_null())
                        .col(ColumnDef::new(Orders::Subtotal).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(Orders::Tax).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(Orders::Total).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::PaymentStatus).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::PaymentIntentId).string().null())
                        .col(
                            ColumnDef::new(Orders::IsPaid)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Orders::PaidAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Orders::PaymentErrorMessage).text().null())
                        .col(ColumnDef::new(Orders::RefundId).string().null())
                        .col(ColumnDef::new(Orders::RefundAmount).decimal_len(16, 4).null())
                        .col(
                            ColumnDef::new(Orders::RefundedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Orders::AddressId).uuid().not_null())
                        .col(ColumnDef::new(Orders::PaymentMethodId).uuid().not_null())
                        .col(ColumnDef::new(Orders::DeliveryDate).date().null())
                        .col(ColumnDef::new(Orders::DeliveryTimeSlot).string().null())
                        .col(
                            ColumnDef::new(Orders::IsPickup)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Orders::PickupLocation).string().null())
                        .col(ColumnDef::new(Orders::SpecialInstructions).text().null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_user_id")
                                .from(Orders::Table, Orders::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_id_created_at")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_payment_intent_id")
                        .table(Orders::Table)
                        .col(Orders::PaymentIntentId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        UserId,
        CartId,
        LineItems,
        Subtotal,
        Tax,
        Total,
        Currency,
        Status,
        PaymentStatus,
        PaymentIntentId,
        IsPaid,
        PaidAt,
        PaymentErrorMessage,
        RefundId,
        RefundAmount,
        RefundedAt,
        AddressId,
        PaymentMethodId,
        DeliveryDate,
        DeliveryTimeSlot,
        IsPickup,
        PickupLocation,
        SpecialInstructions,
        CreatedAt,
        UpdatedAt,
        Version,
    }
}
