use std::fmt;

macro_rules! id_type {
    ($name:ident, $inner:ty) => {
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub struct $name(pub $inner);

        impl From<$inner> for $name {
            #[inline]
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// Primary key of a row in the `jobs` table.
id_type!(JobId, i64);
// Postgres backend pid; doubles as the session identity of a locker connection.
id_type!(BackendPid, i32);

impl BackendPid {
    /// Name of the notification channel a locker with this session listens on.
    pub fn channel(&self) -> String {
        format!("forge_lock_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! id_display_test {
        ($name:ident, $value:expr, $test_name:ident) => {
            #[test]
            fn $test_name() {
                let result = $name::from($value);
                assert_eq!(result.to_string(), $value.to_string());
            }
        };
    }

    id_display_test!(JobId, 42_i64, given_job_id_when_displayed_should_show_inner_value);
    id_display_test!(
        BackendPid,
        7_i32,
        given_backend_pid_when_displayed_should_show_inner_value
    );

    #[test]
    fn given_job_ids_when_compared_should_order_numerically() {
        assert!(JobId(1) < JobId(2));
        assert!(JobId(-5) < JobId(0));
    }

    #[test]
    fn given_backend_pid_when_channel_requested_should_embed_pid() {
        assert_eq!(BackendPid(1234).channel(), "forge_lock_1234");
    }
}
