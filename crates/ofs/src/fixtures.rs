// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

macro_rules! fixtures {
    () => {
        use rstest::fixture;
        use tempdir::TempDir;

        #[allow(dead_code)]
        fn init_logging() {
            let sub = tracing_subscriber::FmtSubscriber::builder()
                .with_max_level(tracing::Level::TRACE)
                .without_time()
                .with_test_writer()
                .finish();
            let _ = tracing::subscriber::set_global_default(sub);
        }

        #[fixture]
        fn tmpdir() -> TempDir {
            TempDir::new("ofs-test-").expect("failed to create dir for test")
        }

        #[allow(dead_code)]
        fn ensure(path: std::path::PathBuf, data: &str) {
            std::fs::create_dir_all(path.parent().unwrap()).expect("failed to make dirs");
            std::fs::write(path, data).expect("failed to write file data");
        }

        /// A helper runner that never spawns anything: it records every
        /// command line and reports exit code 1 for commands containing
        /// any of the configured markers, 0 otherwise.
        #[allow(dead_code)]
        #[derive(Clone, Default)]
        struct ScriptedRunner {
            calls: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
            fail_when: std::sync::Arc<Vec<String>>,
        }

        #[allow(dead_code)]
        impl ScriptedRunner {
            fn failing_on<S: Into<String>>(markers: Vec<S>) -> Self {
                ScriptedRunner {
                    calls: Default::default(),
                    fail_when: std::sync::Arc::new(
                        markers.into_iter().map(Into::into).collect(),
                    ),
                }
            }

            fn calls(&self) -> Vec<String> {
                self.calls.lock().unwrap().clone()
            }
        }

        impl $crate::exec::HelperRunner for ScriptedRunner {
            fn run(
                &self,
                program: &str,
                args: &[std::ffi::OsString],
                _timeout: std::time::Duration,
            ) -> $crate::Result<$crate::exec::HelperOutput> {
                let line = $crate::exec::command_line(program, args);
                self.calls.lock().unwrap().push(line.clone());
                let code = if self.fail_when.iter().any(|marker| line.contains(marker)) {
                    1
                } else {
                    0
                };
                Ok($crate::exec::HelperOutput {
                    code: Some(code),
                    output: String::new(),
                })
            }
        }
    };
}
