// Table and column names are read by Home Assistant; do not rename them.

pub const PRAGMAS: &str = "PRAGMA foreign_keys = ON;";

pub const SENSORS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS sensors (
    sensor_name VARCHAR(255) PRIMARY KEY UNIQUE,
    i2c_address VARCHAR(255)
)";

pub const ENTITIES_DDL: &str = "\
CREATE TABLE IF NOT EXISTS entities (
    entity      VARCHAR(255) PRIMARY KEY UNIQUE,
    entity_id   VARCHAR(255),
    sensor_name VARCHAR(255),
    FOREIGN KEY (sensor_name) REFERENCES sensors(sensor_name)
)";

pub const METRICS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS metrics (
    entity              VARCHAR(255),
    time_stamp          TIMESTAMP,
    date_time           DATETIME,
    value               DOUBLE,
    unit_of_measurement VARCHAR(255),
    PRIMARY KEY (entity, time_stamp),
    FOREIGN KEY (entity) REFERENCES entities(entity)
)";

/// Creation order matters: each table references the one before it.
pub const TABLES: [(&str, &str); 3] = [
    ("sensors", SENSORS_DDL),
    ("entities", ENTITIES_DDL),
    ("metrics", METRICS_DDL),
];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_ddl_executes_on_in_memory_db() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(PRAGMAS).unwrap();
        for (_, ddl) in TABLES {
            conn.execute_batch(ddl).unwrap();
        }
        // Idempotent.
        for (_, ddl) in TABLES {
            conn.execute_batch(ddl).unwrap();
        }
    }
}
