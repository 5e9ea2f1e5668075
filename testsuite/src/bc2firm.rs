//! The bytecode2firm pipeline: javac -> bytecode2firm -> run and compare.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use pipeline::check::{check_retcode_zero, create_check_reference_output};
use pipeline::core::env::Environment;
use pipeline::core::template::{CommandTemplate, render_str};
use pipeline::core::types::ConfigError;
use pipeline::io::config::SuiteConfig;
use pipeline::step::Step;
use pipeline::test::Test;

pub const JAVAC: &str = "javac";
pub const BC2FIRM: &str = "bc2firm";
pub const BC2FIRMFLAGS: &str = "bc2firmflags";

pub const STEP_COMPILE_JAVA: &str = "compile_java";
pub const STEP_COMPILE_CLASS: &str = "compile_class";
pub const STEP_EXECUTE: &str = "execute";

const COMPILE_TIMEOUT: Duration = Duration::from_secs(240);
const EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Fill in tool defaults that `cfg` does not already set.
pub fn with_defaults(mut cfg: SuiteConfig) -> SuiteConfig {
    cfg.vars
        .entry(JAVAC.to_string())
        .or_insert_with(|| "javac".to_string());
    cfg.vars
        .entry(BC2FIRM.to_string())
        .or_insert_with(|| "bytecode2firm".to_string());
    cfg.flags.entry(BC2FIRMFLAGS.to_string()).or_default();
    if cfg.expectations.is_none() {
        cfg.expectations = Some(PathBuf::from("fail_expectations.log"));
    }
    cfg
}

/// Build the three-step test for `filename` (a `*.java` file in the workdir).
pub fn make_bc2firm_test(filename: &str, cfg: &SuiteConfig) -> Result<Test> {
    let compile_java = Step::command(
        STEP_COMPILE_JAVA,
        CommandTemplate::parse("{javac} {testname}"),
        cfg.step_timeout(STEP_COMPILE_JAVA, COMPILE_TIMEOUT),
    )
    .with_check(check_retcode_zero());

    let compile_class = Step::command(
        STEP_COMPILE_CLASS,
        CommandTemplate::parse("{bc2firm} {classname} {bc2firmflags} -o {executable}"),
        cfg.step_timeout(STEP_COMPILE_CLASS, COMPILE_TIMEOUT),
    )
    .with_prepare(derive_executable)
    .with_check(check_retcode_zero());

    let execute = Step::command(
        STEP_EXECUTE,
        CommandTemplate::parse("{executable}"),
        cfg.step_timeout(STEP_EXECUTE, EXECUTE_TIMEOUT),
    )
    .with_check(check_retcode_zero())
    .with_check(create_check_reference_output(format!("{filename}.ref")).with_policy(cfg.whitespace));

    Test::new(filename)
        .with_step(compile_java)?
        .with_step(compile_class)?
        .with_step(execute)
}

/// `classname` is the test file name without `.java`; the executable lands in
/// the build directory.
fn derive_executable(env: &mut Environment) -> Result<(), ConfigError> {
    let testname = env.testname()?;
    let classname = testname
        .strip_suffix(".java")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ConfigError::Invalid(format!("{testname} is not a .java file")))?
        .to_string();
    env.set("classname", classname);
    let executable = render_str("{builddir}/{classname}.exe", env)?;
    env.set("executable", PathBuf::from(executable));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::core::env::Value;

    fn env(testname: &str) -> Environment {
        Environment::new("/tests", "/tests/build")
            .with("testname", testname)
            .with(JAVAC, "javac")
            .with(BC2FIRM, "bytecode2firm")
            .with(BC2FIRMFLAGS, Value::flags_from_str("-O3"))
    }

    #[test]
    fn builds_three_steps_in_order() {
        let cfg = with_defaults(SuiteConfig::default());
        let test = make_bc2firm_test("Hello.java", &cfg).expect("test");
        let names: Vec<&str> = test.steps().iter().map(Step::name).collect();
        assert_eq!(names, vec![STEP_COMPILE_JAVA, STEP_COMPILE_CLASS, STEP_EXECUTE]);
        assert_eq!(test.steps()[2].checks().len(), 2);
        assert_eq!(
            test.steps()[0].command_spec().map(|spec| spec.timeout),
            Some(COMPILE_TIMEOUT)
        );
    }

    #[test]
    fn derives_classname_and_executable() {
        let mut env = env("Hello.java");
        derive_executable(&mut env).expect("derive");
        assert_eq!(env.get("classname"), Some(Value::from("Hello")));
        assert_eq!(env.executable, Some(PathBuf::from("/tests/build/Hello.exe")));

        let command = CommandTemplate::parse("{bc2firm} {classname} {bc2firmflags} -o {executable}")
            .resolve(&env)
            .expect("resolve");
        assert_eq!(command.to_string(), "bytecode2firm Hello -O3 -o /tests/build/Hello.exe");
    }

    #[test]
    fn rejects_non_java_test_names() {
        let mut env = env("Hello.txt");
        let err = derive_executable(&mut env).expect_err("not java");
        assert!(err.to_string().contains("not a .java file"));
    }

    #[test]
    fn config_timeouts_override_defaults() {
        let mut cfg = with_defaults(SuiteConfig::default());
        cfg.step_timeouts.insert(STEP_EXECUTE.to_string(), 3);
        let test = make_bc2firm_test("Hello.java", &cfg).expect("test");
        assert_eq!(
            test.steps()[2].command_spec().map(|spec| spec.timeout),
            Some(Duration::from_secs(3))
        );
    }
}
