/// Table, indexes and seed rows the workload expects to exist. The tool never
/// runs this itself; `--print-schema` emits it for the operator.
pub const PREREQUISITE_SQL: &str = r#"-- database
CREATE DATABASE IF NOT EXISTS testdb DEFAULT CHARACTER SET utf8mb4 COLLATE utf8mb4_general_ci;
USE testdb;

-- table
DROP TABLE IF EXISTS user_operation_log;
CREATE TABLE user_operation_log (
    id BIGINT AUTO_INCREMENT PRIMARY KEY,
    user_id INT NOT NULL,
    operation_type VARCHAR(20) NOT NULL COMMENT 'insert/update/delete',
    operation_time DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    content VARCHAR(100) NOT NULL
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;

-- 1000 seed rows for update/delete/select to find
INSERT INTO user_operation_log (user_id, operation_type, content)
SELECT
    FLOOR(1 + RAND() * 100) AS user_id,
    'insert' AS operation_type,
    CONCAT('seed_', FLOOR(1 + RAND() * 10000)) AS content
FROM INFORMATION_SCHEMA.COLUMNS LIMIT 1000;

-- indexes
CREATE INDEX idx_user_id ON user_operation_log(user_id);
CREATE INDEX idx_operation_time ON user_operation_log(operation_time);
"#;
