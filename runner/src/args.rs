use anyhow::bail;
use dumper::types::Params;

/// Parses repeated `key=value` arguments into run arguments.
///
/// Values stay text; counter stores and conditions compare them by their text form.
pub fn parse_run_args(args: &[String]) -> anyhow::Result<Params> {
    let mut params = Params::new();

    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            bail!("run argument `{arg}` is not of the form key=value");
        };

        let key = key.trim();
        if key.is_empty() {
            bail!("run argument `{arg}` has an empty key");
        }
        if params.insert(key, value).is_some() {
            bail!("run argument `{key}` is given more than once");
        }
    }

    Ok(params)
}
