use crate::database::{Database, SqliteDatabase};
use crate::schema::create_tables;

/// In-memory database with the base schema, two customers (one without a
/// phone number) and addresses whose state codes are in mixed case.
pub(crate) fn migration_db() -> SqliteDatabase {
    let mut db = SqliteDatabase::in_memory().unwrap();
    create_tables(&mut db).unwrap();
    db.execute_script(
        "INSERT INTO customers (customer_id, name, email, phone) VALUES
            (1, 'John Smith', 'john.smith@example.com', '555-123-4567'),
            (2, 'Jane Doe', 'jane.doe@example.com', NULL);
         INSERT INTO addresses (address_id, customer_id, address_type, street_line1, street_line2,
                                city, state, postal_code, country, is_verified) VALUES
            (1, 1, 'home', '123 Main St', NULL, 'Anytown', 'oh', '12345', 'USA', 1),
            (2, 2, 'home', '789 Residential Rd', NULL, 'Hometown', 'Oh', '23456', 'USA', 1);",
    )
    .unwrap();
    db
}
