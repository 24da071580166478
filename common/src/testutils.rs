#[cfg(test)]
pub async fn create_temp_dir() -> anyhow::Result<std::path::PathBuf> {
    let mut idx = 0;
    loop {
        let tmp_dir = std::env::temp_dir().join(format!("ziphash_test{}", &idx));
        if let Err(error) = tokio::fs::create_dir(&tmp_dir).await {
            match error.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    idx += 1;
                }
                _ => return Err(error.into()),
            }
        } else {
            return Ok(tmp_dir);
        }
    }
}

#[cfg(test)]
pub async fn setup_test_dir() -> anyhow::Result<std::path::PathBuf> {
    // create a temporary directory
    let tmp_dir = create_temp_dir().await?;
    // foo
    // |- 0.txt
    // |- bar
    //    |- 1.txt
    //    |- 2.txt
    //    |- 3.txt
    // |- baz
    //    |- 4.txt
    //    |- 5.log
    let foo_path = tmp_dir.join("foo");
    tokio::fs::create_dir(&foo_path).await.unwrap();
    tokio::fs::write(foo_path.join("0.txt"), "0").await.unwrap();
    let bar_path = foo_path.join("bar");
    tokio::fs::create_dir(&bar_path).await.unwrap();
    tokio::fs::write(bar_path.join("1.txt"), "1").await.unwrap();
    tokio::fs::write(bar_path.join("2.txt"), "2").await.unwrap();
    tokio::fs::write(bar_path.join("3.txt"), "3").await.unwrap();
    let baz_path = foo_path.join("baz");
    tokio::fs::create_dir(&baz_path).await.unwrap();
    tokio::fs::write(baz_path.join("4.txt"), "4").await.unwrap();
    tokio::fs::write(baz_path.join("5.log"), "5").await.unwrap();
    Ok(tmp_dir)
}

/// Source layout used by the pipeline tests:
///
/// ```text
/// src
/// |- A
///    |- a.txt
///    |- nested
///       |- b.csv
///       |- skip.bin
/// |- B
///    |- only.bin
/// ```
///
/// With the default allow-list `A` has 2 qualifying files and `B` has none.
#[cfg(test)]
pub async fn setup_source_tree() -> anyhow::Result<std::path::PathBuf> {
    let tmp_dir = create_temp_dir().await?;
    let src = tmp_dir.join("src");
    let a_nested = src.join("A").join("nested");
    tokio::fs::create_dir_all(&a_nested).await?;
    tokio::fs::write(src.join("A").join("a.txt"), "alpha").await?;
    tokio::fs::write(a_nested.join("b.csv"), "1,2,3").await?;
    tokio::fs::write(a_nested.join("skip.bin"), [0u8, 1, 2]).await?;
    let b = src.join("B");
    tokio::fs::create_dir_all(&b).await?;
    tokio::fs::write(b.join("only.bin"), [3u8, 4, 5]).await?;
    Ok(tmp_dir)
}
