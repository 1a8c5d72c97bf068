use phylomix_chain::chain::{ChainBuilder, LocalPool, TraceLikelihood};
use phylomix_chain::data::site_range;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_worker_ranges_cover_the_alignment_exactly() {
    for n_site in [0, 1, 7, 30, 101] {
        for pool_size in 2..=9 {
            assert!(site_range(n_site, 0, pool_size).is_empty());
            let mut next = 0;
            for rank in 1..pool_size {
                let range = site_range(n_site, rank, pool_size);
                assert_eq!(range.min, next, "gap before rank {rank} of {pool_size}");
                assert!(range.max >= range.min);
                next = range.max;
            }
            assert_eq!(next, n_site);
        }
    }
}

#[test]
fn test_only_the_last_worker_takes_the_remainder() {
    let widths: Vec<usize> = (1..4).map(|rank| site_range(11, rank, 4).len()).collect();
    assert_eq!(widths, vec![3, 3, 5]);
    // More workers than sites: everything lands on the last one.
    let widths: Vec<usize> = (1..6).map(|rank| site_range(3, rank, 6).len()).collect();
    assert_eq!(widths, vec![0, 0, 0, 0, 3]);
}

#[test]
fn test_collapse_statistics_come_back_in_site_order() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("aln.fasta");
    fs::write(
        &data,
        ">w\nACGTTGCAACGTTGCAAC\n>x\nACGTTGCTACGATGCAAC\n\
         >y\nACCTTGCAACGTTGGAAC\n>z\nTCGTAGCAACGTTGCATC\n",
    )
    .unwrap();
    let config = ChainBuilder::new()
        .data_file(&data)
        .components(2)
        .trace_likelihood(TraceLikelihood::Cached)
        .seed(8)
        .build()
        .unwrap();

    for n_procs in [2, 4, 6] {
        let mut pool = LocalPool::start(&config, n_procs).unwrap();
        let chain = pool.chain_mut();
        let stats = chain.collapse().unwrap();
        let sites: Vec<usize> = stats.sites.iter().map(|s| s.site).collect();
        assert_eq!(sites, (0..18).collect::<Vec<_>>());
        assert_eq!(stats.branch_events.len(), chain.tree().n_edges());
        assert_eq!(
            stats.total_events(),
            stats.sites.iter().map(|s| u64::from(s.n_sub)).sum::<u64>()
        );
        chain.update_parameters().unwrap();
        chain.unfold().unwrap();
        pool.finish().unwrap();
    }
}
