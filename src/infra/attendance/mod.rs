pub mod sqlite_attendance_store;

pub use sqlite_attendance_store::SqliteAttendanceStore;
